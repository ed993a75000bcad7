//! Loader configuration: which catalog objects become entities.

use serde::{Deserialize, Deserializer, Serialize};

/// Name lists consumed by the filter policy.
///
/// Every list accepts either a YAML sequence or a comma-separated string
/// (`"public.audit_*, reporting.summary"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Omit matching tables and views.
    #[serde(default, deserialize_with = "name_list")]
    pub blacklist: Vec<String>,

    /// Omit all tables and views except matching ones.
    #[serde(default, deserialize_with = "name_list")]
    pub whitelist: Vec<String>,

    /// Omit matching functions.
    #[serde(default, alias = "functionBlacklist", deserialize_with = "name_list")]
    pub function_blacklist: Vec<String>,

    /// Omit all functions except matching ones.
    #[serde(default, alias = "functionWhitelist", deserialize_with = "name_list")]
    pub function_whitelist: Vec<String>,

    /// Tables and views loaded even when blacklisted.
    #[serde(default, deserialize_with = "name_list")]
    pub exceptions: Vec<String>,

    /// Only load entities from these schemas, in lookup order.
    #[serde(default, alias = "allowedSchemas", deserialize_with = "name_list")]
    pub allowed_schemas: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameListRepr {
    Joined(String),
    List(Vec<String>),
}

fn name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<NameListRepr>::deserialize(deserializer)?;
    Ok(match repr {
        None => Vec::new(),
        Some(NameListRepr::Joined(s)) => split_names(&s),
        Some(NameListRepr::List(items)) => items
            .iter()
            .flat_map(|item| split_names(item))
            .collect(),
    })
}

/// Split a comma-separated name list, trimming blanks.
pub fn split_names(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
