use quarry_core::{QuarryError, Result, SqlValue};
use sqlx::Arguments;
use sqlx::postgres::PgArguments;

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<()>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v)
        .map_err(|e| QuarryError::execution(format!("failed to bind parameter: {}", e)))
}

/// Bind positional parameters in order.
///
/// Nulls are bound as text; the statement's casts give them their type.
pub(crate) fn arguments(params: &[SqlValue]) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for value in params {
        match value {
            SqlValue::Null => args_add(&mut args, Option::<String>::None)?,
            SqlValue::Bool(b) => args_add(&mut args, *b)?,
            SqlValue::Int(i) => args_add(&mut args, *i)?,
            SqlValue::Float(f) => args_add(&mut args, *f)?,
            SqlValue::Text(s) => args_add(&mut args, s.clone())?,
            SqlValue::Json(v) => args_add(&mut args, sqlx::types::Json(v.clone()))?,
            SqlValue::TextArray(items) => args_add(&mut args, items.clone())?,
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binds_every_value_kind() {
        let params = vec![
            SqlValue::Null,
            SqlValue::Bool(true),
            SqlValue::Int(7),
            SqlValue::Float(1.5),
            SqlValue::Text("a".into()),
            SqlValue::Json(json!({ "k": 1 })),
            SqlValue::TextArray(vec!["x".into()]),
        ];
        let args = arguments(&params).unwrap();
        assert_eq!(args.len(), params.len());
    }
}
