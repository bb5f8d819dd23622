// Built-in catalogue of constrained field types

use super::types::FieldType;
use regex::Regex;
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const URL_PATTERN: &str = r"^https?://\S+$";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::error!("Built-in pattern '{pattern}' failed to compile: {e}");
            None
        }
    })
    .clone()
}

/// Namespace for the reusable field types shared across schemas.
pub struct FieldTypes;

impl FieldTypes {
    /// Person or entity name, 1 to 100 characters.
    pub fn name() -> FieldType {
        FieldType::string().min_length(1).max_length(100)
    }

    pub fn title() -> FieldType {
        FieldType::string().min_length(1).max_length(200)
    }

    pub fn description() -> FieldType {
        FieldType::string().max_length(1000)
    }

    pub fn content() -> FieldType {
        FieldType::string().max_length(50_000)
    }

    pub fn email() -> FieldType {
        static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
        FieldType {
            pattern: compiled(&EMAIL, EMAIL_PATTERN),
            ..FieldType::string().max_length(254)
        }
    }

    pub fn url() -> FieldType {
        static URL: OnceLock<Option<Regex>> = OnceLock::new();
        FieldType {
            pattern: compiled(&URL, URL_PATTERN),
            ..FieldType::string().max_length(2048)
        }
    }

    /// Whole years in [0, 150].
    pub fn age() -> FieldType {
        FieldType::integer().range(0.0, 150.0)
    }

    pub fn price() -> FieldType {
        FieldType::number().min(0.0)
    }

    pub fn rating() -> FieldType {
        FieldType::number().range(0.0, 5.0)
    }

    pub fn quantity() -> FieldType {
        FieldType::integer().min(0.0)
    }

    pub fn percentage() -> FieldType {
        FieldType::number().range(0.0, 100.0)
    }

    /// Resolve a catalogue entry by name, ignoring case.
    pub fn lookup(name: &str) -> Option<FieldType> {
        let field_type = match name.to_ascii_lowercase().as_str() {
            "name" => Self::name(),
            "title" => Self::title(),
            "description" => Self::description(),
            "content" => Self::content(),
            "email" => Self::email(),
            "url" => Self::url(),
            "age" => Self::age(),
            "price" => Self::price(),
            "rating" => Self::rating(),
            "quantity" => Self::quantity(),
            "percentage" => Self::percentage(),
            _ => return None,
        };
        Some(field_type)
    }
}
