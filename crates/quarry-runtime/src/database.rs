//! The database handle: driver, loader policy and the current registry.

use crate::driver::{Driver, DriverTransaction, Row};
use crate::executor::{finish, run_in, run_on_pool, EntityHandle, Settings, Target};
use crate::introspect::introspect;
use crate::registry::Registry;
use futures::future::BoxFuture;
use quarry_compiler::Statement;
use quarry_core::{QuarryConfig, QuarryError, Result, SqlValue};
use quarry_filter::FilterPolicy;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Entry point for all queries.
///
/// The registry is published as an `Arc` snapshot. Readers clone the
/// pointer and never block a reload for longer than that; a reload builds a
/// complete new registry before swapping it in, so a failed reload leaves
/// the previous one in place.
pub struct Database {
    driver: Arc<dyn Driver>,
    policy: FilterPolicy,
    settings: Settings,
    current: RwLock<Arc<Registry>>,
    reload_lock: Mutex<()>,
}

impl Database {
    /// Build the loader policy from `config` and load the first registry.
    pub async fn open(config: &QuarryConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        let policy = FilterPolicy::from_config(&config.loader)?;
        let settings = Settings::from_config(&config.connection);
        Self::with_policy(driver, policy, settings).await
    }

    pub async fn with_policy(driver: Arc<dyn Driver>, policy: FilterPolicy, settings: Settings) -> Result<Self> {
        let registry = load(driver.as_ref(), &policy).await?;
        tracing::info!(entities = registry.len(), "Registry loaded");
        Ok(Self {
            driver,
            policy,
            settings,
            current: RwLock::new(Arc::new(registry)),
            reload_lock: Mutex::new(()),
        })
    }

    /// The registry snapshot in effect right now.
    pub fn registry(&self) -> Arc<Registry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Re-introspect and swap in a fresh registry, waiting for any reload
    /// already running.
    pub async fn reload(&self) -> Result<Arc<Registry>> {
        let _guard = self.reload_lock.lock().await;
        self.reload_locked().await
    }

    /// Like [`reload`](Self::reload), but fails with
    /// [`QuarryError::ReloadInProgress`] instead of waiting.
    pub async fn try_reload(&self) -> Result<Arc<Registry>> {
        let _guard = self
            .reload_lock
            .try_lock()
            .map_err(|_| QuarryError::ReloadInProgress)?;
        self.reload_locked().await
    }

    async fn reload_locked(&self) -> Result<Arc<Registry>> {
        match load(self.driver.as_ref(), &self.policy).await {
            Ok(registry) => {
                let registry = Arc::new(registry);
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&registry);
                tracing::info!(entities = registry.len(), "Registry reloaded");
                Ok(registry)
            }
            Err(err) => {
                tracing::error!(error = %err, "Registry reload failed, keeping the previous registry");
                Err(err)
            }
        }
    }

    /// Operations on the named entity, run on pooled connections.
    pub fn entity(&self, name: &str) -> Result<EntityHandle<'_>> {
        let registry = self.registry();
        let entity = registry.lookup(name)?;
        Ok(EntityHandle::new(
            entity,
            registry,
            self.settings,
            Target::Pool(self.driver.as_ref()),
        ))
    }

    /// Run caller-written SQL with positional parameters.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        run_on_pool(self.driver.as_ref(), self.settings, &Statement::new(sql, params)).await
    }

    /// Run `f` inside one transaction on one connection.
    ///
    /// Commits when `f` returns `Ok`, rolls back on any `Err`. Dropping the
    /// returned future before it completes also rolls back.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let inner = self.driver.begin().await?;
        let mut tx = Transaction {
            inner,
            registry: self.registry(),
            settings: self.settings,
        };
        let result = f(&mut tx).await;
        finish(tx.inner, result).await
    }
}

async fn load(driver: &dyn Driver, policy: &FilterPolicy) -> Result<Registry> {
    let raw = introspect(driver).await?;
    Ok(Registry::build(raw, policy))
}

/// An open transaction.
///
/// Entities are looked up in the registry snapshot taken when the
/// transaction began.
pub struct Transaction {
    inner: Box<dyn DriverTransaction>,
    registry: Arc<Registry>,
    settings: Settings,
}

impl Transaction {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn entity(&mut self, name: &str) -> Result<EntityHandle<'_>> {
        let entity = self.registry.lookup(name)?;
        Ok(EntityHandle::new(
            entity,
            Arc::clone(&self.registry),
            self.settings,
            Target::Transaction(self.inner.as_mut()),
        ))
    }

    pub async fn query(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        run_in(self.inner.as_mut(), self.settings, &Statement::new(sql, params)).await
    }

    /// Nested scope. Runs on the same connection; the outermost scope
    /// decides commit or rollback.
    pub async fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        f(self).await
    }
}
