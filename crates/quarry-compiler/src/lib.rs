//! # quarry-compiler
//!
//! Compiles criteria objects and query options into parameterized Postgres
//! SQL against an [`EntityDescriptor`](quarry_core::EntityDescriptor).
//!
//! ```text
//! { "age >=": 21, "status": "active" }  +  users(age int4, status text)
//!     -> "age" >= $1::int4 AND "status" = $2      [Int(21), Text("active")]
//! ```
//!
//! Every value is bound as a parameter; only catalog identifiers (quoted)
//! and catalog type names (as casts) are written into the SQL text. JSON
//! paths are bound too, as text arrays for `#>>`.

mod builder;
mod compiler;
mod predicate;
mod resolve;
mod statement;

pub use builder::SqlBuilder;
pub use compiler::{CompiledQuery, CriteriaCompiler};
pub use resolve::{EntityResolver, NoEntities};
pub use statement::Statement;
