//! Record flattening and schema unification
//!
//! [`RecordFlattener`] turns one nested entity into a flat record; [`SchemaUnifier`]
//! folds the flat records of a whole run into one deterministic column layout.
//! Both are pure: no I/O, no shared state.

use serde_json::Value;

use crate::{FlatRecord, Record};

pub mod attributes;
pub mod schema;

pub use attributes::{canonicalize_attributes, AttributeNames, CanonicalAttribute};
pub use schema::{ColumnKey, Schema, SchemaLayout, SchemaUnifier, SplitPosition};

/// How the sub-entities of a split group become columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitShape {
    /// Each sub-entity's own fields, one level deep
    Plain,
    /// Canonical `id, name, value, raw` attribute columns
    Attribute,
}

/// One split group: a nested list expanded into `<prefix><n>_<field>` columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitGroup {
    /// Column prefix, e.g. `address`
    pub prefix: String,
    /// Candidate source fields; the first one holding a non-empty list wins
    pub sources: Vec<String>,
    /// Maximum sub-entities expanded
    pub cap: usize,
    /// Column shape
    pub shape: SplitShape,
}

/// Per-entity flattening rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenConfig {
    /// Split groups in column precedence order
    pub split_groups: Vec<SplitGroup>,
    /// Fields kept out of the base pass and retained whole, in this order
    pub deferred: Vec<String>,
    /// Columns placed at the back of the row, in this order
    pub back_columns: Vec<String>,
    /// Values filled in when a field is absent after flattening
    pub defaults: Vec<(String, Value)>,
}

impl FlattenConfig {
    /// Column layout rules for [`SchemaUnifier`]
    pub fn layout(&self) -> SchemaLayout {
        SchemaLayout {
            split_prefixes: self.split_groups.iter().map(|g| g.prefix.clone()).collect(),
            deferred: self.deferred.clone(),
            back_columns: self.back_columns.clone(),
        }
    }

    fn is_deferred(&self, field: &str) -> bool {
        self.deferred.iter().any(|d| d == field)
    }
}

/// Serialize a nested value to compact JSON text; scalars pass through unchanged
///
/// Already-textual values are returned as-is, so applying this twice is a no-op.
pub fn to_cell(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(compact_json(value)),
        scalar => scalar.clone(),
    }
}

/// Compact single-line JSON (upstream key order preserved)
pub fn compact_json(value: &Value) -> String {
    // Serializing a `Value` cannot fail: every map key is already a string.
    serde_json::to_string(value).unwrap_or_default()
}

/// Render a flat value as CSV cell text
///
/// Strings verbatim, numbers in JSON form, booleans `true`/`false`, null empty,
/// anything still nested as compact JSON.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => compact_json(nested),
    }
}

/// Converts one entity into a flat record
#[derive(Debug, Clone, Default)]
pub struct RecordFlattener {
    config: FlattenConfig,
    attribute_names: AttributeNames,
}

impl RecordFlattener {
    /// Flattener with the given rules and an empty attribute lookup
    pub fn new(config: FlattenConfig) -> Self {
        Self {
            config,
            attribute_names: AttributeNames::default(),
        }
    }

    /// Attach the run's attribute id -> name lookup
    pub fn with_attribute_names(mut self, names: AttributeNames) -> Self {
        self.attribute_names = names;
        self
    }

    /// Rules in use
    pub fn config(&self) -> &FlattenConfig {
        &self.config
    }

    /// Flatten `record`
    ///
    /// Output field order: base fields in record order, split columns group by group,
    /// deferred fields in configured order, then defaults.
    pub fn flatten(&self, record: &Record) -> FlatRecord {
        let mut out = FlatRecord::new();

        for (field, value) in record {
            if self.config.is_deferred(field) {
                continue;
            }
            out.insert(field.clone(), to_cell(value));
        }

        for group in &self.config.split_groups {
            let Some(items) = split_source(record, group) else {
                continue;
            };
            match group.shape {
                SplitShape::Plain => split_plain(&mut out, &group.prefix, items, group.cap),
                SplitShape::Attribute => {
                    let canonical = canonicalize_attributes(items, &self.attribute_names);
                    for (i, attribute) in canonical.into_iter().take(group.cap).enumerate() {
                        let n = i + 1;
                        let prefix = &group.prefix;
                        out.insert(format!("{prefix}{n}_id"), to_cell(&attribute.id));
                        out.insert(format!("{prefix}{n}_name"), to_cell(&attribute.name));
                        out.insert(format!("{prefix}{n}_value"), to_cell(&attribute.value));
                        out.insert(format!("{prefix}{n}_raw"), Value::String(attribute.raw));
                    }
                }
            }
        }

        for field in &self.config.deferred {
            if let Some(value) = record.get(field) {
                let cell = match value {
                    Value::Null => Value::String("[]".to_string()),
                    other => to_cell(other),
                };
                out.insert(field.clone(), cell);
            }
        }

        for (field, default) in &self.config.defaults {
            if !out.contains_key(field) {
                out.insert(field.clone(), to_cell(default));
            }
        }

        out
    }
}

/// First configured source field holding a non-empty list
fn split_source<'a>(record: &'a Record, group: &SplitGroup) -> Option<&'a [Value]> {
    group.sources.iter().find_map(|source| match record.get(source) {
        Some(Value::Array(items)) if !items.is_empty() => Some(items.as_slice()),
        _ => None,
    })
}

/// `<prefix><n>_<field>` columns; non-object entries are skipped but keep their index
fn split_plain(out: &mut FlatRecord, prefix: &str, items: &[Value], cap: usize) {
    for (i, item) in items.iter().take(cap).enumerate() {
        let Value::Object(fields) = item else {
            continue;
        };
        let n = i + 1;
        for (field, value) in fields {
            out.insert(format!("{prefix}{n}_{field}"), to_cell(value));
        }
    }
}
