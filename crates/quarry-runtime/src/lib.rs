//! # quarry-runtime
//!
//! Runs compiled statements against a database through a [`Driver`].
//!
//! - [`introspect`] reads tables, views and functions from the catalog
//! - [`Registry`] filters them through the loader policy and indexes them
//! - [`Database`] owns the current registry, reloads it atomically and hands
//!   out [`EntityHandle`]s for queries, writes, documents and function calls
//!
//! ```ignore
//! let db = Database::open(&config, driver).await?;
//! let adults = db
//!     .entity("users")?
//!     .find(&Criteria::from_json(&json!({"age >=": 21}))?, &QueryOptions::new())
//!     .await?;
//! ```

pub mod database;
pub mod driver;
pub mod executor;
pub mod introspect;
pub mod registry;

pub use database::{Database, Transaction};
pub use driver::{Driver, DriverTransaction, Row, RowStream};
pub use executor::{EntityHandle, Settings};
pub use introspect::{introspect, RawCatalog, RawFunction, RawRelation};
pub use registry::Registry;
