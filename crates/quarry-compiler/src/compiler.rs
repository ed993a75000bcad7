//! Criteria and options to SQL clauses.

use quarry_core::{
    Criteria, Direction, EntityDescriptor, JoinKind, NullsOrder, OrderItem, QuarryError, QueryOptions,
    Result, SqlValue,
};
use serde_json::Value;

use crate::builder::SqlBuilder;
use crate::predicate::{push_field_param, push_where};
use crate::resolve::{EntityResolver, FieldRef, Joined, Scope};

/// The clauses of one compiled read.
///
/// Each clause is stored without its keyword and may be empty. Clauses were
/// written in the order they appear in a `SELECT`, so the placeholders in
/// them run `$1..$n` across `projection`, `source`, `where_clause`,
/// `order_clause` and `paging_clause`, and `$k` binds `params[k - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub projection: String,
    /// `"schema"."name"` plus any joins.
    pub source: String,
    pub where_clause: String,
    pub order_clause: String,
    /// `LIMIT $n [OFFSET $m]`.
    pub paging_clause: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    /// ` WHERE ...`, ` ORDER BY ...` and the paging clause, each only if present.
    pub fn tail(&self) -> String {
        let mut sql = String::new();
        if !self.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clause);
        }
        if !self.order_clause.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_clause);
        }
        if !self.paging_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&self.paging_clause);
        }
        sql
    }
}

/// Extra predicate ANDed after the criteria, written within the same scope.
pub(crate) type ExtraPredicate<'a> = &'a dyn Fn(&mut SqlBuilder, &Scope<'_>) -> Result<()>;

/// Compiles criteria against entity descriptors.
///
/// Compilation is pure: it never touches the database and fails only with
/// [`QuarryError::InvalidCriteria`].
#[derive(Clone, Copy)]
pub struct CriteriaCompiler<'r> {
    pub(crate) resolver: &'r dyn EntityResolver,
    pub(crate) documents: bool,
}

impl<'r> CriteriaCompiler<'r> {
    pub fn new(resolver: &'r dyn EntityResolver) -> Self {
        Self {
            resolver,
            documents: false,
        }
    }

    /// Resolve unknown field names as paths inside the document body.
    pub fn for_documents(mut self) -> Self {
        self.documents = true;
        self
    }

    pub fn compile(
        &self,
        entity: &EntityDescriptor,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<CompiledQuery> {
        self.compile_with(entity, criteria, options, None)
    }

    pub(crate) fn compile_with(
        &self,
        entity: &EntityDescriptor,
        criteria: &Criteria,
        options: &QueryOptions,
        extra: Option<ExtraPredicate<'_>>,
    ) -> Result<CompiledQuery> {
        check_paging(options)?;
        let joins = self.resolve_joins(entity, options)?;
        let scope = self.scope(entity, &joins)?;
        let mut b = SqlBuilder::new();

        push_projection(&mut b, &scope, options)?;
        let projection = b.take_sql();

        push_source(&mut b, &scope, options)?;
        let source = b.take_sql();

        let mut terms = 0;
        if !criteria.is_empty() {
            push_where(&mut b, self.resolver, &scope, criteria)?;
            terms += 1;
        }
        if let Some(extra) = extra {
            if terms > 0 {
                b.push_str(" AND ");
            }
            extra(&mut b, &scope)?;
            terms += 1;
        }
        if options.order.iter().any(|item| item.last.is_some()) {
            if terms > 0 {
                b.push_str(" AND ");
            }
            push_keyset(&mut b, &scope, options)?;
        }
        let where_clause = b.take_sql();

        push_order(&mut b, &scope, options)?;
        let order_clause = b.take_sql();

        push_paging(&mut b, options)?;
        let paging_clause = b.take_sql();

        let params = b.into_params();
        tracing::trace!(
            entity = %entity.qualified_name(),
            params = params.len(),
            "Compiled criteria"
        );
        Ok(CompiledQuery {
            projection,
            source,
            where_clause,
            order_clause,
            paging_clause,
            params,
        })
    }

    /// Compile only a predicate, continuing the numbering in `b`.
    ///
    /// Used by statements that write parameters before their `WHERE`.
    pub(crate) fn push_predicate(
        &self,
        b: &mut SqlBuilder,
        entity: &EntityDescriptor,
        criteria: &Criteria,
    ) -> Result<()> {
        let scope = self.scope(entity, &[])?;
        if !criteria.is_empty() {
            b.push_str(" WHERE ");
            push_where(b, self.resolver, &scope, criteria)?;
        }
        Ok(())
    }

    pub(crate) fn scope<'a>(&self, entity: &'a EntityDescriptor, joins: &'a [Joined]) -> Result<Scope<'a>> {
        if !entity.is_relation() {
            return Err(QuarryError::invalid_criteria(format!(
                "{} is a function and cannot be queried with criteria",
                entity.qualified_name()
            )));
        }
        if self.documents && !entity.is_document() {
            return Err(QuarryError::invalid_criteria(format!(
                "{} is not a document table",
                entity.qualified_name()
            )));
        }
        Ok(Scope::new(entity, joins, self.documents))
    }

    fn resolve_joins(&self, entity: &EntityDescriptor, options: &QueryOptions) -> Result<Vec<Joined>> {
        let mut joins: Vec<Joined> = Vec::with_capacity(options.joins.len());
        for join_spec in &options.joins {
            let target = self.resolver.resolve_entity(&join_spec.entity).ok_or_else(|| {
                QuarryError::invalid_criteria(format!("join references unknown entity '{}'", join_spec.entity))
            })?;
            if !target.is_relation() {
                return Err(QuarryError::invalid_criteria(format!(
                    "cannot join function {}",
                    target.qualified_name()
                )));
            }
            if join_spec.on.is_empty() {
                return Err(QuarryError::invalid_criteria(format!(
                    "join with '{}' needs at least one 'on' column pair",
                    join_spec.entity
                )));
            }
            let alias = join_spec.alias.clone().unwrap_or_else(|| target.name.clone());
            if alias.is_empty() || alias.contains('.') {
                return Err(QuarryError::invalid_criteria(format!("invalid join alias '{}'", alias)));
            }
            if alias == entity.name || joins.iter().any(|j| j.alias == alias) {
                return Err(QuarryError::invalid_criteria(format!(
                    "join alias '{}' is used more than once",
                    alias
                )));
            }
            joins.push(Joined { alias, entity: target });
        }
        Ok(joins)
    }
}

fn check_paging(options: &QueryOptions) -> Result<()> {
    if let Some(size) = options.page_size {
        if options.limit.is_some() || options.offset.is_some() {
            return Err(QuarryError::invalid_criteria(
                "page_size cannot be combined with limit or offset",
            ));
        }
        if options.order.is_empty() {
            return Err(QuarryError::invalid_criteria(
                "page_size requires an explicit order",
            ));
        }
        if size == 0 {
            return Err(QuarryError::invalid_criteria("page_size must be positive"));
        }
    }

    let with_last = options.order.iter().filter(|item| item.last.is_some()).count();
    if with_last == 0 {
        return Ok(());
    }
    if options.page_size.is_none() {
        return Err(QuarryError::invalid_criteria(
            "order 'last' values are only valid with page_size",
        ));
    }
    if with_last != options.order.len() {
        return Err(QuarryError::invalid_criteria(
            "either every order item or none carries a 'last' value",
        ));
    }
    let direction = options.order[0].direction;
    if options.order.iter().any(|item| item.direction != direction) {
        return Err(QuarryError::invalid_criteria(
            "keyset pagination needs one direction for every order item",
        ));
    }
    Ok(())
}

fn push_projection(b: &mut SqlBuilder, scope: &Scope<'_>, options: &QueryOptions) -> Result<()> {
    if options.fields.is_empty() {
        if scope.joins.is_empty() {
            b.push('*');
            return Ok(());
        }
        b.push_str(scope.entity.sql_name());
        b.push_str(".*");
        for joined in scope.joins {
            b.push_str(", to_jsonb(");
            b.push_identifier(&joined.alias);
            b.push_str(") AS ");
            b.push_identifier(&joined.alias);
        }
        return Ok(());
    }

    b.push_iter(&options.fields, ", ", |b, name| {
        let field = scope.resolve(name)?;
        field.push_expr(b);
        if field.is_path() || *name != field.column.name {
            b.push_str(" AS ");
            b.push_identifier(name);
        }
        Ok(())
    })
}

fn push_source(b: &mut SqlBuilder, scope: &Scope<'_>, options: &QueryOptions) -> Result<()> {
    if options.only {
        b.push_str("ONLY ");
    }
    b.push_str(scope.entity.sql_name());

    for (join_spec, joined) in options.joins.iter().zip(scope.joins) {
        b.push_str(match join_spec.kind {
            JoinKind::Inner => " INNER JOIN ",
            JoinKind::Left => " LEFT OUTER JOIN ",
        });
        b.push_str(joined.entity.sql_name());
        b.push_str(" AS ");
        b.push_identifier(&joined.alias);
        b.push_str(" ON ");
        b.push_iter(&join_spec.on, " AND ", |b, (local, remote)| {
            let local = scope.resolve(local)?;
            let remote = joined.entity.column(remote).ok_or_else(|| {
                QuarryError::invalid_criteria(format!(
                    "'{}' is not a column of joined relation {}",
                    remote,
                    joined.entity.qualified_name()
                ))
            })?;
            local.push_expr(b);
            b.push_str(" = ");
            b.push_identifier(&joined.alias);
            b.push('.');
            b.push_identifier(&remote.name);
            Ok::<_, QuarryError>(())
        })?;
    }
    Ok(())
}

/// `(a, b) > ($x, $y)`: rows strictly after the last row of the previous page.
///
/// A nullable single key also takes the NULL rows when they sort after every
/// value (`("n" > $1 OR "n" IS NULL)`); row comparisons never match NULLs, so
/// several keys must all be non-null.
fn push_keyset(b: &mut SqlBuilder, scope: &Scope<'_>, options: &QueryOptions) -> Result<()> {
    let fields = options
        .order
        .iter()
        .map(|item| scope.resolve(&item.field))
        .collect::<Result<Vec<_>>>()?;
    let first = &options.order[0];
    let op = match first.direction {
        Direction::Asc => " > ",
        Direction::Desc => " < ",
    };

    if let [field] = fields.as_slice() {
        let last = keyset_last(first)?;
        if !is_nullable(field) {
            field.push_expr(b);
            b.push_str(op);
            return push_field_param(b, field, last);
        }
        let nulls_last = match (first.direction, first.nulls) {
            (_, Some(NullsOrder::Last)) | (Direction::Asc, None) => true,
            (_, Some(NullsOrder::First)) | (Direction::Desc, None) => false,
        };
        if nulls_last {
            b.push('(');
        }
        field.push_expr(b);
        b.push_str(op);
        push_field_param(b, field, last)?;
        if nulls_last {
            b.push_str(" OR ");
            field.push_expr(b);
            b.push_str(" IS NULL)");
        }
        return Ok(());
    }

    if let Some(nullable) = fields.iter().find(|f| is_nullable(f)) {
        return Err(QuarryError::invalid_criteria(format!(
            "'{}' may be null and cannot be part of a multi-column keyset",
            nullable.name
        )));
    }
    b.push('(');
    b.push_iter(&fields, ", ", |b, field| {
        field.push_expr(b);
        Ok::<_, QuarryError>(())
    })?;
    b.push(')');
    b.push_str(op);
    b.push('(');
    b.push_iter(fields.iter().zip(&options.order), ", ", |b, (field, item)| {
        push_field_param(b, field, keyset_last(item)?)
    })?;
    b.push(')');
    Ok(())
}

fn keyset_last(item: &OrderItem) -> Result<&Value> {
    match &item.last {
        Some(last) if !last.is_null() => Ok(last),
        _ => Err(QuarryError::invalid_criteria(format!(
            "'{}': keyset 'last' value must not be null",
            item.field
        ))),
    }
}

/// JSON paths can always be missing.
fn is_nullable(field: &FieldRef) -> bool {
    field.is_path() || field.column.nullable
}

fn push_order(b: &mut SqlBuilder, scope: &Scope<'_>, options: &QueryOptions) -> Result<()> {
    b.push_iter(&options.order, ", ", |b, item| {
        let field = scope.resolve(&item.field)?;
        field.push_expr(b);
        b.push(' ');
        b.push_str(item.direction.sql());
        match item.nulls {
            Some(NullsOrder::First) => b.push_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => b.push_str(" NULLS LAST"),
            None => {}
        }
        Ok(())
    })
}

fn push_paging(b: &mut SqlBuilder, options: &QueryOptions) -> Result<()> {
    let limit = options.page_size.or(options.limit);
    if let Some(limit) = limit {
        b.push_str("LIMIT ");
        b.push_param(SqlValue::Int(to_i64("limit", limit)?));
    }
    if let Some(offset) = options.offset {
        if limit.is_some() {
            b.push(' ');
        }
        b.push_str("OFFSET ");
        b.push_param(SqlValue::Int(to_i64("offset", offset)?));
    }
    Ok(())
}

fn to_i64(name: &str, value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| QuarryError::invalid_criteria(format!("{} {} is out of range", name, value)))
}
