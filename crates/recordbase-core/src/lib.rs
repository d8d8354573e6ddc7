//! Recordbase Core - access control and record lifecycle engine.
//!
//! This crate provides the catalog of resources and roles, ability
//! resolution, field projection, versioned record storage with diff-based
//! history, sequential identifiers and the aggregation pipeline.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod database;
pub mod error;
pub mod query;
pub mod security;
pub mod storage;

pub use catalog::{
    AccessRule, Catalog, FieldDef, FieldType, FormDef, PermissionDef, ResourceDef,
    ResourcePermissions, RoleDef, RoleDirectory,
};
pub use database::{Database, SchemaDocument, SchemaSummary};
pub use error::{Error, Result};
pub use query::{AggregationDef, Filter, FilterEvaluator, Operator};
pub use security::{Ability, AbilityResolver, Action, Author, FieldProjector, Subject, User};
pub use storage::{
    Change, ChangeKind, HistoryEngine, HistoryEntry, ListOptions, Record, RecordStore,
    StorageConfig, Version,
};
