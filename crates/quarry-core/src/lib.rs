//! # quarry-core
//!
//! Types shared by every Quarry crate: entity descriptors produced by
//! introspection, the criteria AST consumed by the compiler, positional
//! parameter values, query options, configuration and the error taxonomy.

pub mod config;
pub mod criteria;
pub mod entity;
pub mod error;
pub mod ident;
pub mod options;
pub mod value;

pub use config::{ConnectionConfig, LoaderConfig, PoolConfig, QuarryConfig};
pub use criteria::{Condition, Criteria, Operand, Operator, SubSelect};
pub use entity::{ColumnDescriptor, EntityDescriptor, EntityKind, FunctionSignature, TypeCategory};
pub use error::{QuarryError, Result};
pub use options::{Direction, JoinKind, JoinSpec, NullsOrder, OrderItem, QueryOptions, TextSearch};
pub use value::SqlValue;
