use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::QueryArgs;

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Quarry CLI")]
struct Cli {
    /// Configuration file. Defaults to ./quarry.yaml when present.
    #[arg(long, short = 'c', global = true, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL URL, overriding the configured connection.
    #[arg(long = "database-url", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the entities the loader registered.
    Entities {
        /// Only show one kind: table, view, document_table or function.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Print an entity descriptor as JSON.
    Describe { entity: String },

    /// Find rows matching a criteria document.
    Find {
        entity: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Print rows as they arrive, one JSON object per line.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },

    /// Count rows matching a criteria document.
    Count {
        entity: String,

        #[arg(long, default_value = "{}")]
        criteria: String,
    },

    /// Full-text search a document table.
    Search {
        entity: String,

        term: String,

        /// Body fields to search instead of the `search` column.
        #[arg(long = "field")]
        fields: Vec<String>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Print the compiled SELECT for a find without running it.
    Sql {
        entity: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Call a database function. Arguments are parsed as JSON, falling back to text.
    Call { function: String, args: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.database_url)?;
    let db = commands::open(&config).await?;

    match cli.cmd {
        Command::Entities { kind } => commands::catalog::entities(&db, kind.as_deref())?,
        Command::Describe { entity } => commands::catalog::describe(&db, &entity)?,
        Command::Find {
            entity,
            query,
            stream,
        } => {
            if stream {
                commands::query::stream(&db, &entity, &query).await?
            } else {
                commands::query::find(&db, &entity, &query).await?
            }
        }
        Command::Count { entity, criteria } => {
            commands::query::count(&db, &entity, &criteria).await?
        }
        Command::Search {
            entity,
            term,
            fields,
            query,
        } => commands::query::search(&db, &entity, &term, fields, &query).await?,
        Command::Sql { entity, query } => commands::query::sql(&db, &entity, &query)?,
        Command::Call { function, args } => commands::query::call(&db, &function, &args).await?,
    }

    Ok(())
}
