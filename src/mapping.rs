//! Typed helpers for writing index mappings.
//!
//! ```rust,ignore
//! use search_sync::mapping::{Property, properties};
//!
//! let mappings = properties([
//!     ("title", Property::Text),
//!     ("published", Property::Boolean),
//!     ("created", Property::date()),
//!     ("location", Property::GeoPoint),
//! ]);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Date format used when none is given.
pub const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Property {
    Boolean,
    Integer,
    Keyword,
    Text,
    GeoPoint,
    Date {
        format: String,
    },
    Object {
        properties: BTreeMap<String, Property>,
    },
    Nested {
        properties: BTreeMap<String, Property>,
    },
}

impl Property {
    pub fn date() -> Self {
        Property::Date {
            format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn date_with_format(format: impl Into<String>) -> Self {
        Property::Date {
            format: format.into(),
        }
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Property)>,
        K: Into<String>,
    {
        Property::Object {
            properties: collect(fields),
        }
    }

    pub fn nested<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Property)>,
        K: Into<String>,
    {
        Property::Nested {
            properties: collect(fields),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn collect<I, K>(fields: I) -> BTreeMap<String, Property>
where
    I: IntoIterator<Item = (K, Property)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Build a `{"properties": {...}}` mapping document.
pub fn properties<I, K>(fields: I) -> Value
where
    I: IntoIterator<Item = (K, Property)>,
    K: Into<String>,
{
    let props: serde_json::Map<String, Value> = fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_value()))
        .collect();
    serde_json::json!({ "properties": props })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_properties() {
        assert_eq!(Property::Boolean.to_value(), json!({"type": "boolean"}));
        assert_eq!(Property::GeoPoint.to_value(), json!({"type": "geo_point"}));
        assert_eq!(Property::Integer.to_value(), json!({"type": "integer"}));
    }

    #[test]
    fn date_defaults_format() {
        assert_eq!(
            Property::date().to_value(),
            json!({"type": "date", "format": "yyyy-MM-dd HH:mm:ss"})
        );
    }

    #[test]
    fn nested_and_object_carry_properties() {
        let nested = Property::nested([("label", Property::Keyword)]);
        assert_eq!(
            nested.to_value(),
            json!({"type": "nested", "properties": {"label": {"type": "keyword"}}})
        );
        let obj = Property::object(Vec::<(String, Property)>::new());
        assert_eq!(obj.to_value(), json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn properties_document() {
        let doc = properties([("title", Property::Text), ("views", Property::Integer)]);
        assert_eq!(doc["properties"]["title"], json!({"type": "text"}));
        assert_eq!(doc["properties"]["views"], json!({"type": "integer"}));
    }
}
