//! Core of the analytics query engine: schema registry, query model,
//! validation, SQL compilation, query catalog and batch orchestration.

pub mod batch;
pub mod catalog;
pub mod compile;
pub mod error;
pub mod ident;
pub mod limits;
pub mod query;
pub mod schema;
pub mod tenant;
pub mod validate;

pub use batch::*;
pub use catalog::{EntryInfo, QueryCatalog, QueryCatalogEntry, ResolveRequest, TemplateContext};
pub use compile::{compile, CompiledQuery, ParamValue, QueryParams, QueryScope};
pub use error::{Error, ErrorKind, Result, ValidationError, ValidationErrorKind};
pub use query::*;
pub use schema::{ColumnDefinition, ColumnType, SchemaRegistry, TableDefinition};
pub use tenant::{TenantContext, TenantParams};
pub use validate::QueryValidator;
