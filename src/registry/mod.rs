//! Per-entity export profiles
//!
//! Each exportable entity is described purely by configuration: listing endpoint,
//! truncation rules, per-entity sub-resources, split groups and back columns.
//! The pipeline in [`crate::export::executor`] never branches on the entity kind
//! itself.
//!
//! # Profiles
//!
//! - **Products**: `v3/catalog/products`, metadata pagination, no enrichment
//! - **Customers**: `v3/customers?include=addresses,attributes`, batched address and
//!   attribute-value enrichment, `address`/`attribute` split groups
//! - **Orders**: `v2/orders`, bare-array pagination, per-order line items merged into
//!   `products_json`

use serde_json::Value;

use crate::export::config::ExportConfig;
use crate::export::enrichment::{Availability, SubResource};
use crate::flatten::{FlattenConfig, SplitGroup, SplitShape};
use crate::{EntityKind, Record};

/// Which configured cap bounds a split group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCap {
    /// [`ExportConfig::max_addresses`]
    Addresses,
    /// [`ExportConfig::max_attributes`]
    Attributes,
}

/// Static description of one split group
#[derive(Debug, Clone, Copy)]
pub struct SplitGroupDef {
    /// Column prefix
    pub prefix: &'static str,
    /// Candidate source fields, first non-empty list wins
    pub sources: &'static [&'static str],
    /// Column shape
    pub shape: SplitShape,
    /// Cap source
    pub cap: SplitCap,
}

/// A sub-list whose inline copy may be truncated
///
/// A parent needs enrichment when `count_field` exceeds the length of `inline_field`.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedList {
    /// Advertised total, e.g. `address_count`
    pub count_field: &'static str,
    /// Inline list, e.g. `addresses`
    pub inline_field: &'static str,
    /// Field receiving the fetched list
    pub target_field: &'static str,
    /// Batched endpoint serving the full list
    pub resource: SubResource,
}

impl TruncatedList {
    /// Whether `record` advertises more entries than it carries inline
    pub fn is_truncated(&self, record: &Record) -> bool {
        let Some(count) = record.get(self.count_field).and_then(Value::as_i64) else {
            return false;
        };
        let inline = match record.get(self.inline_field) {
            None | Some(Value::Null) => 0,
            Some(Value::Array(items)) => items.len(),
            Some(_) => return false,
        };
        count > inline as i64
    }
}

/// One supplemental call per parent
#[derive(Debug, Clone, Copy)]
pub struct PerEntityFetch {
    /// Path template; `{id}` is replaced by the parent id
    pub path_template: &'static str,
    /// Field receiving the fetched list
    pub merge_field: &'static str,
}

impl PerEntityFetch {
    /// Store-relative path for `id`
    pub fn path_for(&self, id: i64) -> String {
        self.path_template.replace("{id}", &id.to_string())
    }
}

/// Value filled in for an absent field after flattening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// `[]`
    EmptyList,
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            DefaultValue::EmptyList => Value::Array(Vec::new()),
        }
    }
}

/// Complete export profile for one entity kind
#[derive(Debug, Clone)]
pub struct EntityProfile {
    /// Entity kind
    pub kind: EntityKind,
    /// Store-relative listing path
    pub listing_path: &'static str,
    /// Extra listing query parameters
    pub listing_query: &'static [(&'static str, &'static str)],
    /// Attribute definitions listing walked once per run for the id -> name lookup
    pub attribute_definitions_path: Option<&'static str>,
    /// Truncated sub-lists fetched through batched id filters
    pub truncated_lists: &'static [TruncatedList],
    /// Per-entity supplemental fetch
    pub per_entity: Option<PerEntityFetch>,
    /// Split groups in column precedence order
    pub split_groups: &'static [SplitGroupDef],
    /// Fields excluded from the base pass, retained whole
    pub deferred: &'static [&'static str],
    /// Back columns in declared order
    pub back_columns: &'static [&'static str],
    /// Defaults for absent fields
    pub defaults: &'static [(&'static str, DefaultValue)],
}

impl EntityProfile {
    /// Flattening rules with split caps taken from `config`
    pub fn flatten_config(&self, config: &ExportConfig) -> FlattenConfig {
        FlattenConfig {
            split_groups: self
                .split_groups
                .iter()
                .map(|group| SplitGroup {
                    prefix: group.prefix.to_string(),
                    sources: group.sources.iter().map(|s| s.to_string()).collect(),
                    cap: match group.cap {
                        SplitCap::Addresses => config.max_addresses,
                        SplitCap::Attributes => config.max_attributes,
                    },
                    shape: group.shape,
                })
                .collect(),
            deferred: self.deferred.iter().map(|s| s.to_string()).collect(),
            back_columns: self.back_columns.iter().map(|s| s.to_string()).collect(),
            defaults: self
                .defaults
                .iter()
                .map(|(field, value)| (field.to_string(), value.to_value()))
                .collect(),
        }
    }
}

/// Customer addresses; required
pub const CUSTOMER_ADDRESSES: SubResource = SubResource {
    name: "addresses",
    path: "v3/customers/addresses",
    filter_param: "customer_id:in",
    parent_key: "customer_id",
    availability: Availability::Required,
};

/// Customer attribute values; stores without the scope answer 403
pub const CUSTOMER_ATTRIBUTE_VALUES: SubResource = SubResource {
    name: "attribute-values",
    path: "v3/customers/attribute-values",
    filter_param: "customer_id:in",
    parent_key: "customer_id",
    availability: Availability::Optional,
};

/// Catalog products
pub const PRODUCTS_PROFILE: EntityProfile = EntityProfile {
    kind: EntityKind::Products,
    listing_path: "v3/catalog/products",
    listing_query: &[],
    attribute_definitions_path: None,
    truncated_lists: &[],
    per_entity: None,
    split_groups: &[],
    deferred: &[],
    back_columns: &[],
    defaults: &[],
};

/// Customers with addresses and attributes
pub const CUSTOMERS_PROFILE: EntityProfile = EntityProfile {
    kind: EntityKind::Customers,
    listing_path: "v3/customers",
    listing_query: &[("include", "addresses,attributes")],
    attribute_definitions_path: Some("v3/customers/attributes"),
    truncated_lists: &[
        TruncatedList {
            count_field: "address_count",
            inline_field: "addresses",
            target_field: "addresses",
            resource: CUSTOMER_ADDRESSES,
        },
        TruncatedList {
            count_field: "attribute_count",
            inline_field: "attributes",
            target_field: "attribute_values",
            resource: CUSTOMER_ATTRIBUTE_VALUES,
        },
    ],
    per_entity: None,
    split_groups: &[
        SplitGroupDef {
            prefix: "address",
            sources: &["addresses"],
            shape: SplitShape::Plain,
            cap: SplitCap::Addresses,
        },
        SplitGroupDef {
            prefix: "attribute",
            sources: &["attributes", "attribute_values"],
            shape: SplitShape::Attribute,
            cap: SplitCap::Attributes,
        },
    ],
    deferred: &["addresses", "attributes", "attribute_values"],
    back_columns: &[
        "address_count",
        "addresses",
        "attribute_count",
        "attributes",
        "attribute_values",
    ],
    defaults: &[],
};

/// v2 orders with line items
pub const ORDERS_PROFILE: EntityProfile = EntityProfile {
    kind: EntityKind::Orders,
    listing_path: "v2/orders",
    listing_query: &[],
    attribute_definitions_path: None,
    truncated_lists: &[],
    per_entity: Some(PerEntityFetch {
        path_template: "v2/orders/{id}/products",
        merge_field: "products_json",
    }),
    split_groups: &[],
    deferred: &["products_json"],
    back_columns: &["products_json"],
    defaults: &[("products_json", DefaultValue::EmptyList)],
};

/// Profile for `kind`
pub fn profile(kind: EntityKind) -> &'static EntityProfile {
    match kind {
        EntityKind::Products => &PRODUCTS_PROFILE,
        EntityKind::Customers => &CUSTOMERS_PROFILE,
        EntityKind::Orders => &ORDERS_PROFILE,
    }
}
