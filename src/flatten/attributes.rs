//! Attribute canonicalization
//!
//! Customer attributes arrive in two shapes: attribute-value rows
//! (`attribute_id`, `attribute_value`) and included attributes (`id`, `name`, `value`).
//! Both become [`CanonicalAttribute`].

use serde_json::Value;
use std::collections::HashMap;

use super::compact_json;
use crate::{entity_id, Record};

/// Attribute id -> display name, built once per run from the definitions listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeNames {
    names: HashMap<i64, String>,
}

impl AttributeNames {
    /// Build the lookup from definition records; entries missing an id or name are ignored
    pub fn from_definitions(definitions: &[Record]) -> Self {
        let names = definitions
            .iter()
            .filter_map(|definition| {
                let id = definition.get("id").and_then(entity_id)?;
                let name = match definition.get("name")? {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((id, name))
            })
            .collect();
        Self { names }
    }

    /// Build the lookup from explicit pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (i64, String)>) -> Self {
        Self {
            names: pairs.into_iter().collect(),
        }
    }

    /// Name for `id`
    pub fn get(&self, id: i64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Number of known attributes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no attribute is known
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One attribute in canonical form
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAttribute {
    /// `attribute_id`, else `id`
    pub id: Value,
    /// `name`, else the definition name for `id`, else null
    pub name: Value,
    /// `attribute_value`, else `value`
    pub value: Value,
    /// Compact JSON of the original entry
    pub raw: String,
}

/// Canonicalize attribute entries; non-object entries are dropped
pub fn canonicalize_attributes(items: &[Value], names: &AttributeNames) -> Vec<CanonicalAttribute> {
    items
        .iter()
        .filter_map(|item| {
            let Value::Object(fields) = item else {
                return None;
            };

            let id = present(fields, "attribute_id")
                .or_else(|| present(fields, "id"))
                .cloned()
                .unwrap_or(Value::Null);

            let name = match present(fields, "name") {
                Some(name) => name.clone(),
                None => entity_id(&id)
                    .and_then(|id| names.get(id))
                    .map(|name| Value::String(name.to_string()))
                    .unwrap_or(Value::Null),
            };

            let value = present(fields, "attribute_value")
                .or_else(|| present(fields, "value"))
                .cloned()
                .unwrap_or(Value::Null);

            Some(CanonicalAttribute {
                id,
                name,
                value,
                raw: compact_json(item),
            })
        })
        .collect()
}

/// Field value unless missing or null
fn present<'a>(fields: &'a Record, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}
