//! Entity registry.
//!
//! A [`Registry`] is an immutable snapshot built from one introspection
//! pass. Reloading builds a new snapshot and swaps it in; readers holding
//! the old `Arc` keep a consistent view.

use crate::introspect::RawCatalog;
use quarry_compiler::EntityResolver;
use quarry_core::ident::split_qualified;
use quarry_core::{EntityDescriptor, EntityKind, QuarryError, Result};
use quarry_filter::FilterPolicy;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
    /// Schemas searched, in order, for unqualified names.
    search_path: Vec<String>,
}

impl Registry {
    /// Filter the raw catalog and index what survives by qualified name.
    ///
    /// Relations are registered before functions, so a function sharing a
    /// relation's name is dropped. Overloads of one function merge into a
    /// single entity. Any other duplicate keeps the first in catalog order.
    pub fn build(raw: RawCatalog, policy: &FilterPolicy) -> Self {
        let mut entities: BTreeMap<String, EntityDescriptor> = BTreeMap::new();

        for relation in raw.relations {
            let name = relation.qualified_name();
            if !policy.is_entity_allowed(&name) {
                tracing::trace!(entity = %name, "Relation filtered out");
                continue;
            }
            if entities.contains_key(&name) {
                tracing::debug!(entity = %name, "Duplicate relation ignored");
                continue;
            }
            entities.insert(name, relation.into_descriptor());
        }

        for function in raw.functions {
            let name = function.qualified_name();
            if !policy.is_function_allowed(&name) {
                tracing::trace!(function = %name, "Function filtered out");
                continue;
            }
            match entities.get_mut(&name) {
                Some(existing) if existing.kind == EntityKind::Function => {
                    existing.signatures.push(function.signature);
                }
                Some(_) => {
                    tracing::warn!(
                        function = %name,
                        "Function shares its name with a table or view and was not loaded"
                    );
                }
                None => {
                    let entity = EntityDescriptor::function(function.schema, function.name)
                        .with_signature(function.signature);
                    entities.insert(name, entity);
                }
            }
        }

        let schemas: BTreeSet<&str> = entities.values().map(|e| e.schema.as_str()).collect();
        let mut search_path: Vec<String> = Vec::new();
        for schema in policy.schema_order().into_iter().chain(["public"]).chain(schemas.iter().copied()) {
            if schemas.contains(schema) && !search_path.iter().any(|s| s == schema) {
                search_path.push(schema.to_string());
            }
        }

        Self {
            entities: entities
                .into_iter()
                .map(|(name, entity)| (name, Arc::new(entity)))
                .collect(),
            search_path,
        }
    }

    /// Find an entity by `schema.name`, or by bare name along the search path.
    pub fn lookup(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.get(name)
            .ok_or_else(|| QuarryError::EntityNotFound(name.to_string()))
    }

    fn get(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        match split_qualified(name) {
            (Some(_), _) => self.entities.get(name).cloned(),
            (None, bare) => self
                .search_path
                .iter()
                .find_map(|schema| self.entities.get(&format!("{}.{}", schema, bare)))
                .cloned(),
        }
    }

    /// All entities, sorted by qualified name.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    /// Tables, document tables included.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.of_kind(|k| matches!(k, EntityKind::Table | EntityKind::DocumentTable))
    }

    pub fn views(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.of_kind(|k| k == EntityKind::View)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.of_kind(|k| k == EntityKind::Function)
    }

    fn of_kind(&self, pred: impl Fn(EntityKind) -> bool) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values().filter(move |e| pred(e.kind))
    }

    /// Schemas holding at least one entity, in lookup order.
    pub fn schemas(&self) -> &[String] {
        &self.search_path
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityResolver for Registry {
    fn resolve_entity(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.get(name)
    }
}
