pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod query;
pub mod response;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod validation;

pub use config::{DatabaseConfig, HookFailurePolicy};
pub use driver::{Document, DriverError, MemoryDriver, StorageDriver};
pub use error::{MongoliteError, Result};
pub use filter::{Filter, FilterExpr, Operator};
pub use hooks::{HookContext, HookEvent, HookOutcome, HookWarning};
pub use query::{Cursor, Fetched, FindOptions, Projection, QueryStream, SortDirection, SortKey};
pub use response::{ErrorDetail, ErrorKind, Response, ResponseData};
pub use schema::{FieldDefinition, FieldKind, FieldType, FieldTypes, Schema};
pub use store::{Collection, Database};
pub use validation::{FieldIssue, IssueKind, ValidationError};
