//! # dqlkit
//!
//! Query-construction and persistence helpers for a relational ORM layer.
//!
//! ## Features
//!
//! - **Dynamic DQL building**: `DqlBuilder` assembles SELECT/UPDATE/DELETE
//!   statements from fluent calls, with AND/OR folding and alias prefixing
//! - **Safe parameter binding**: values never end up in statement text; every
//!   value is bound under a generated or caller-chosen name
//! - **Native result-set mapping**: column aliases and hydration rules derived
//!   from entity metadata, inheritance included
//! - **Lazy paging**: `ResultSet` counts once and pages on demand
//! - **Race-tolerant inserts**: `NonLockingUniqueInserter` turns a concurrent
//!   unique violation into "already exists"
//! - **Typed errors**: driver failures are classified into duplicate-entry,
//!   empty-value and generic database errors
//!
//! ## Query builder
//!
//! ```ignore
//! use dqlkit::{DqlBuilder, args};
//!
//! let query = DqlBuilder::new()
//!     .select("u")
//!     .from("App\\User", "u")
//!     .where_("name", args!["alice"])
//!     .or_where("age > ?", args![18])
//!     .order("name DESC");
//!
//! let dql = query.get_dql()?;
//! ```
//!
//! ## Executing
//!
//! ```ignore
//! use dqlkit::{Connection, NativeQuery, ResultSet, HydrationMode};
//!
//! let conn = Connection::new(dqlkit::PgDriver::new(client));
//! let built = query.build_select()?;
//! let mut results = ResultSet::new(NativeQuery::from_built(&conn, built));
//! results.apply_paging(0, 20)?;
//! let total = results.get_total_count().await?;
//! let rows = results.get_iterator(HydrationMode::Array).await?;
//! ```

pub mod alias;
pub mod builder;
pub mod classify;
pub mod condition;
pub mod config;
pub mod connection;
pub mod error;
pub mod inserter;
pub mod metadata;
pub mod paginator;
pub mod params;
pub mod platform;
pub mod query;
pub mod result_set;
pub mod rsm;
pub mod schema;
pub mod value;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use builder::{BuiltQuery, Direction, DqlBuilder, JoinCondition, JoinKind};
pub use condition::{ConditionBuilder, Expr, Mode};
pub use config::ConnectionConfig;
pub use connection::{Connection, Driver, Row, Statement, StatementContext};
pub use error::{DatabaseError, DbError, DbResult, DriverError, DuplicateEntry, EmptyValue};
pub use inserter::{DirectSession, Entity, EntitySession, NonLockingUniqueInserter, UniqueInsertPlan};
pub use metadata::{
    AssociationKind, AssociationMapping, ClassMetadata, DiscriminatorColumn, FieldMapping,
    IdGenerator, InheritanceType, JoinColumn, MetadataRegistry,
};
pub use paginator::Paginator;
pub use params::{Arg, IntoArg, Parameter, Parameters, Segment, separate_parameters};
pub use platform::Platform;
pub use query::{HydrationMode, NativeQuery, Query, ResultItem};
pub use result_set::{PaginatedQuery, ResultSet};
pub use rsm::{
    ColumnMapping, ColumnRenaming, HydratedEntity, HydratedRow, ResultSetMapping,
    ResultSetMappingBuilder,
};
pub use schema::{Index, SchemaManager};
pub use value::{ParamType, Value};

#[cfg(feature = "postgres")]
pub use postgres::PgDriver;
