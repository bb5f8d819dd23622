mod field_types;
mod parser;
mod types;

pub use field_types::FieldTypes;
pub use parser::{parse_schemas, parse_schemas_str};
pub use types::{FieldDefinition, FieldKind, FieldType, Predicate, Schema, SchemaBuilder};
