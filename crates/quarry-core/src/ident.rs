//! Identifier quoting.
//!
//! Every identifier Quarry writes into SQL text comes from the catalog (a
//! column, relation, schema or type name that introspection returned). The
//! quoting below makes any such name safe to embed, including names with
//! uppercase letters, spaces or embedded quotes.

/// Quote a single identifier: `users` -> `"users"`, `we"ird` -> `"we""ird"`.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote a schema-qualified name: `"public"."users"`.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Split `schema.name` into its parts. A name without a dot has no schema.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, rest)) => (Some(schema), rest),
        None => (None, name),
    }
}
