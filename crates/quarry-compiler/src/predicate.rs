//! Criteria to SQL predicates.

use std::slice;

use quarry_core::{
    ColumnDescriptor, Condition, Criteria, Operand, Operator, QuarryError, Result, SqlValue,
    SubSelect, TypeCategory,
};
use serde_json::Value;

use crate::builder::SqlBuilder;
use crate::resolve::{EntityResolver, FieldRef, Scope};

/// Write a top-level predicate (no surrounding parentheses for the outer AND).
///
/// Callers skip this entirely when `criteria.is_empty()`.
pub(crate) fn push_where(
    b: &mut SqlBuilder,
    resolver: &dyn EntityResolver,
    scope: &Scope<'_>,
    criteria: &Criteria,
) -> Result<()> {
    match criteria {
        Criteria::And(children) if children.len() > 1 => {
            b.push_iter(children, " AND ", |b, child| push_criteria(b, resolver, scope, child))
        }
        other => push_criteria(b, resolver, scope, other),
    }
}

fn push_criteria(
    b: &mut SqlBuilder,
    resolver: &dyn EntityResolver,
    scope: &Scope<'_>,
    criteria: &Criteria,
) -> Result<()> {
    match criteria {
        Criteria::Condition(condition) => push_condition(b, resolver, scope, condition),
        Criteria::And(children) => push_group(b, resolver, scope, children, " AND ", "TRUE"),
        Criteria::Or(children) => push_group(b, resolver, scope, children, " OR ", "FALSE"),
        Criteria::PrimaryKey(value) => push_primary_key(b, scope, value),
    }
}

fn push_group(
    b: &mut SqlBuilder,
    resolver: &dyn EntityResolver,
    scope: &Scope<'_>,
    children: &[Criteria],
    separator: &str,
    empty: &str,
) -> Result<()> {
    match children {
        [] => {
            b.push_str(empty);
            Ok(())
        }
        [only] => push_criteria(b, resolver, scope, only),
        _ => {
            b.push('(');
            b.push_iter(children, separator, |b, child| {
                push_criteria(b, resolver, scope, child)
            })?;
            b.push(')');
            Ok(())
        }
    }
}

fn push_primary_key(b: &mut SqlBuilder, scope: &Scope<'_>, value: &Value) -> Result<()> {
    let key = scope.entity.single_primary_key().ok_or_else(|| {
        QuarryError::invalid_criteria(format!(
            "{} has no single-column primary key to look up by",
            scope.entity.qualified_name()
        ))
    })?;
    let field = scope.resolve(&key.name)?;
    match value {
        Value::Null => Err(QuarryError::invalid_criteria(
            "primary key lookup value must not be null",
        )),
        Value::Object(_) => Err(QuarryError::invalid_criteria(
            "primary key lookup value must be a scalar or a list",
        )),
        Value::Array(items) => push_in_list(b, &field, items, false),
        scalar => push_comparison(b, &field, Operator::Eq, scalar),
    }
}

fn push_condition(
    b: &mut SqlBuilder,
    resolver: &dyn EntityResolver,
    scope: &Scope<'_>,
    condition: &Condition,
) -> Result<()> {
    let field = scope.resolve(&condition.field)?;
    let op = condition.op;
    check_operator(&field, op)?;

    match &condition.operand {
        Operand::SubSelect(sub) => push_sub_select(b, resolver, &field, op, sub),
        Operand::Scalar(value) => match op {
            Operator::Is | Operator::IsNot => push_is(b, &field, op, value),
            Operator::Eq | Operator::Ne if value.is_null() => {
                field.push_expr(b);
                b.push_str(if op == Operator::Eq {
                    " IS NULL"
                } else {
                    " IS NOT NULL"
                });
                Ok(())
            }
            _ if value.is_null() => Err(QuarryError::invalid_criteria(format!(
                "'{}': {} cannot compare against null; use eq, ne or is",
                field.name,
                op.sql()
            ))),
            Operator::In | Operator::NotIn => {
                push_in_list(b, &field, slice::from_ref(value), op == Operator::NotIn)
            }
            Operator::Between => Err(QuarryError::invalid_criteria(format!(
                "'{}': between expects a list of two values",
                field.name
            ))),
            _ => push_comparison(b, &field, op, value),
        },
        Operand::List(items) => match op {
            // Array and JSON columns compare a list as one whole value.
            Operator::Eq | Operator::Ne if compares_whole_value(&field) => {
                push_comparison(b, &field, op, &Value::Array(items.clone()))
            }
            Operator::Eq | Operator::In => push_in_list(b, &field, items, false),
            Operator::Ne | Operator::NotIn => push_in_list(b, &field, items, true),
            Operator::Between => push_between(b, &field, items),
            op if op.is_containment() => push_comparison(b, &field, op, &Value::Array(items.clone())),
            _ => Err(QuarryError::invalid_criteria(format!(
                "'{}': {} does not take a list",
                field.name,
                op.sql()
            ))),
        },
    }
}

fn compares_whole_value(field: &FieldRef) -> bool {
    !field.is_path() && matches!(field.column.category, TypeCategory::Array | TypeCategory::Json)
}

/// Reject operators that make no sense for the field's type category.
fn check_operator(field: &FieldRef, op: Operator) -> Result<()> {
    let category = field.category();
    let incompatible = || {
        QuarryError::invalid_criteria(format!(
            "operator {} is not valid on '{}' ({})",
            op.sql(),
            field.name,
            category.as_str()
        ))
    };

    if op.is_pattern() && category != TypeCategory::Text {
        return Err(incompatible());
    }
    if op.is_ordering() && category == TypeCategory::Json {
        return Err(incompatible());
    }
    if matches!(op, Operator::In | Operator::NotIn) && category == TypeCategory::Json {
        return Err(incompatible());
    }
    match op {
        Operator::Overlaps if category != TypeCategory::Array => Err(incompatible()),
        Operator::Contains | Operator::ContainedBy
            if !matches!(category, TypeCategory::Array | TypeCategory::Json) =>
        {
            Err(incompatible())
        }
        _ => Ok(()),
    }
}

fn push_is(b: &mut SqlBuilder, field: &FieldRef, op: Operator, value: &Value) -> Result<()> {
    let keyword = match value {
        Value::Null => "NULL",
        Value::Bool(true) => "TRUE",
        Value::Bool(false) => "FALSE",
        _ => {
            return Err(QuarryError::invalid_criteria(format!(
                "'{}': {} expects null, true or false",
                field.name,
                op.sql()
            )));
        }
    };
    field.push_expr(b);
    b.push(' ');
    b.push_str(op.sql());
    b.push(' ');
    b.push_str(keyword);
    Ok(())
}

/// `field op $n`, with the comparison shaped by the field's type.
fn push_comparison(b: &mut SqlBuilder, field: &FieldRef, op: Operator, value: &Value) -> Result<()> {
    if field.is_path() {
        return push_path_comparison(b, field, op, value);
    }

    match field.column.category {
        TypeCategory::Json => {
            push_jsonb(b, field, |b| field.push_column(b));
            push_operator(b, op);
            b.push_cast_param(SqlValue::json(value), Some("jsonb"));
        }
        TypeCategory::Array if !value.is_array() && op.is_containment() => {
            let wrapped = Value::Array(vec![value.clone()]);
            field.push_column(b);
            push_operator(b, op);
            push_field_param(b, field, &wrapped)?;
        }
        _ => {
            field.push_column(b);
            push_operator(b, op);
            push_field_param(b, field, value)?;
        }
    }
    Ok(())
}

fn push_path_comparison(b: &mut SqlBuilder, field: &FieldRef, op: Operator, value: &Value) -> Result<()> {
    match value {
        Value::Object(_) | Value::Array(_) => {
            if !matches!(op, Operator::Eq | Operator::Ne) {
                return Err(QuarryError::invalid_criteria(format!(
                    "'{}': {} cannot compare a JSON object or array",
                    field.name,
                    op.sql()
                )));
            }
            push_jsonb_path(b, field, op, value);
        }
        // 1.0 and 1 are equal as jsonb numbers but not as extracted text.
        Value::Number(_) if matches!(op, Operator::Eq | Operator::Ne) => {
            push_jsonb_path(b, field, op, value);
        }
        Value::Number(_) if op.is_ordering() => {
            push_numeric_path(b, field);
            push_operator(b, op);
            push_numeric_param(b, field, value)?;
        }
        _ => {
            field.push_expr(b);
            push_operator(b, op);
            push_field_param(b, field, value)?;
        }
    }
    Ok(())
}

fn push_jsonb_path(b: &mut SqlBuilder, field: &FieldRef, op: Operator, value: &Value) {
    push_jsonb(b, field, |b| field.push_json_expr(b));
    push_operator(b, op);
    b.push_cast_param(SqlValue::json(value), Some("jsonb"));
}

fn push_operator(b: &mut SqlBuilder, op: Operator) {
    b.push(' ');
    b.push_str(op.sql());
    b.push(' ');
}

/// Plain `json` has no equality or containment operators; compare as `jsonb`.
fn push_jsonb(b: &mut SqlBuilder, field: &FieldRef, push: impl FnOnce(&mut SqlBuilder)) {
    push(b);
    if field.column.udt_name == "json" {
        b.push_str("::jsonb");
    }
}

fn push_numeric_path(b: &mut SqlBuilder, field: &FieldRef) {
    field.push_expr(b);
    b.push_str("::numeric");
}

fn push_numeric_param(b: &mut SqlBuilder, field: &FieldRef, value: &Value) -> Result<()> {
    let param = SqlValue::text(value).ok_or_else(|| unfit(&field.name, value))?;
    b.push_cast_param(param, Some("numeric"));
    Ok(())
}

fn push_in_list(b: &mut SqlBuilder, field: &FieldRef, items: &[Value], negated: bool) -> Result<()> {
    let (nulls, values): (Vec<&Value>, Vec<&Value>) = items.iter().partition(|v| v.is_null());
    let null_test = if negated { " IS NOT NULL" } else { " IS NULL" };

    if values.is_empty() {
        if nulls.is_empty() {
            // x IN () is never true; x NOT IN () always is.
            b.push_str(if negated { "TRUE" } else { "FALSE" });
        } else {
            field.push_expr(b);
            b.push_str(null_test);
        }
        return Ok(());
    }

    let with_nulls = !nulls.is_empty();
    if with_nulls {
        b.push('(');
    }
    field.push_expr(b);
    b.push_str(if negated { " NOT IN (" } else { " IN (" });
    b.push_iter(values, ", ", |b, value| push_field_param(b, field, value))?;
    b.push(')');
    if with_nulls {
        b.push_str(if negated { " AND " } else { " OR " });
        field.push_expr(b);
        b.push_str(null_test);
        b.push(')');
    }
    Ok(())
}

fn push_between(b: &mut SqlBuilder, field: &FieldRef, items: &[Value]) -> Result<()> {
    let [low, high] = items else {
        return Err(QuarryError::invalid_criteria(format!(
            "'{}': between expects exactly two values, got {}",
            field.name,
            items.len()
        )));
    };
    if low.is_null() || high.is_null() {
        return Err(QuarryError::invalid_criteria(format!(
            "'{}': between bounds must not be null",
            field.name
        )));
    }

    if field.is_path() && low.is_number() && high.is_number() {
        push_numeric_path(b, field);
        b.push_str(" BETWEEN ");
        push_numeric_param(b, field, low)?;
        b.push_str(" AND ");
        push_numeric_param(b, field, high)?;
    } else {
        field.push_expr(b);
        b.push_str(" BETWEEN ");
        push_field_param(b, field, low)?;
        b.push_str(" AND ");
        push_field_param(b, field, high)?;
    }
    Ok(())
}

fn push_sub_select(
    b: &mut SqlBuilder,
    resolver: &dyn EntityResolver,
    field: &FieldRef,
    op: Operator,
    sub: &SubSelect,
) -> Result<()> {
    let keyword = match op {
        Operator::In | Operator::Eq => " IN (SELECT ",
        Operator::NotIn | Operator::Ne => " NOT IN (SELECT ",
        other => {
            return Err(QuarryError::invalid_criteria(format!(
                "'{}': operator {} cannot take a sub-select",
                field.name,
                other.sql()
            )));
        }
    };
    let entity = resolver.resolve_entity(&sub.entity).ok_or_else(|| {
        QuarryError::invalid_criteria(format!("sub-select references unknown entity '{}'", sub.entity))
    })?;
    if !entity.is_relation() {
        return Err(QuarryError::invalid_criteria(format!(
            "sub-select target {} is not a table or view",
            entity.qualified_name()
        )));
    }

    let inner = Scope::new(&entity, &[], false);
    let column = inner.resolve_column(&sub.field)?;

    field.push_expr(b);
    b.push_str(keyword);
    b.push_identifier(&column.name);
    b.push_str(" FROM ");
    b.push_str(entity.sql_name());
    if !sub.criteria.is_empty() {
        b.push_str(" WHERE ");
        push_where(b, resolver, &inner, &sub.criteria)?;
    }
    b.push(')');
    Ok(())
}

/// Bind a value compared to `field`: text for JSON paths, the column's
/// representation (with a cast) otherwise.
pub(crate) fn push_field_param(b: &mut SqlBuilder, field: &FieldRef, value: &Value) -> Result<()> {
    if field.is_path() {
        let param = SqlValue::text(value).ok_or_else(|| unfit(&field.name, value))?;
        b.push_param(param);
        return Ok(());
    }
    let (param, cast) = column_param(&field.column, value)?;
    b.push_cast_param(param, cast.as_deref());
    Ok(())
}

/// Convert a JSON value into the parameter written to or compared with a
/// column, plus the cast that turns the bound value into the column type.
///
/// The parameter's representation depends only on the column, never on the
/// JSON type of the value: scalars are bound as text and parsed by the cast.
/// Drivers cache prepared statements by SQL text, so one placeholder must
/// not see different wire types across calls.
pub(crate) fn column_param(column: &ColumnDescriptor, value: &Value) -> Result<(SqlValue, Option<String>)> {
    let cast = column.needs_cast().then(|| column.sql_type());
    if value.is_null() {
        return Ok((SqlValue::Null, cast));
    }
    let param = match column.category {
        TypeCategory::Json => Some(SqlValue::json(value)),
        TypeCategory::Array => match value {
            Value::Array(items) => SqlValue::text_array(items),
            _ => None,
        },
        _ => SqlValue::text(value),
    };
    param
        .map(|p| (p, cast))
        .ok_or_else(|| unfit(&column.name, value))
}

fn unfit(field: &str, value: &Value) -> QuarryError {
    QuarryError::invalid_criteria(format!("value {} does not fit '{}'", value, field))
}
