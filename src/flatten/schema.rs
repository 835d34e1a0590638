//! Column unification
//!
//! Final column order = A ++ B.. ++ D ++ E:
//! - A: ordinary fields in first-seen order across the whole run
//! - B..: each split group in configured precedence, sorted by (index, field)
//! - D: declared back columns that occur anywhere, in declared order
//! - E: whatever is left (deferred fields that are not back columns), first-seen order
//!
//! Order depends only on the keys observed and their first-seen positions.

use std::collections::HashSet;

use super::render_cell;
use crate::FlatRecord;

/// Classification rules for [`SchemaUnifier`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaLayout {
    /// Split group prefixes in precedence order
    pub split_prefixes: Vec<String>,
    /// Deferred field names
    pub deferred: Vec<String>,
    /// Back columns in declared order
    pub back_columns: Vec<String>,
}

/// Where a split column sits inside its group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitPosition {
    /// Group precedence (index into [`SchemaLayout::split_prefixes`])
    pub group: usize,
    /// 1-based sub-entity index
    pub index: u64,
    /// Sub-entity field name
    pub field: String,
}

/// A rendered column name plus its split position, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKey {
    /// Column header
    pub name: String,
    /// Set for split columns
    pub split: Option<SplitPosition>,
}

impl ColumnKey {
    fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            split: None,
        }
    }
}

/// Final column layout of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Columns in output order
    pub columns: Vec<ColumnKey>,
}

impl Schema {
    /// Column headers in output order
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Render `record` as cells in column order; absent fields become empty cells
    pub fn render_row(&self, record: &FlatRecord) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| record.get(&column.name).map(render_cell).unwrap_or_default())
            .collect()
    }
}

/// Accumulates first-seen key order over a record stream
#[derive(Debug, Clone, Default)]
pub struct SchemaUnifier {
    layout: SchemaLayout,
    seen: HashSet<String>,
    first_seen: Vec<String>,
}

impl SchemaUnifier {
    /// Unifier applying `layout`
    pub fn new(layout: SchemaLayout) -> Self {
        Self {
            layout,
            seen: HashSet::new(),
            first_seen: Vec::new(),
        }
    }

    /// Note the keys of the next record in emission order
    pub fn observe(&mut self, record: &FlatRecord) {
        for key in record.keys() {
            if !self.seen.contains(key) {
                self.seen.insert(key.clone());
                self.first_seen.push(key.clone());
            }
        }
    }

    /// Observe every record of `records`
    pub fn observe_all<'a>(&mut self, records: impl IntoIterator<Item = &'a FlatRecord>) {
        for record in records {
            self.observe(record);
        }
    }

    /// Compute the final column order
    pub fn finish(&self) -> Schema {
        let mut ordinary = Vec::new();
        let mut split = Vec::new();
        let mut leftovers = Vec::new();

        for key in &self.first_seen {
            if self.layout.back_columns.contains(key) {
                continue;
            }
            if let Some(position) = self.split_position(key) {
                split.push(ColumnKey {
                    name: key.clone(),
                    split: Some(position),
                });
            } else if self.layout.deferred.contains(key) {
                leftovers.push(ColumnKey::plain(key));
            } else {
                ordinary.push(ColumnKey::plain(key));
            }
        }

        split.sort_by(|a, b| a.split.cmp(&b.split));

        let back = self
            .layout
            .back_columns
            .iter()
            .filter(|column| self.seen.contains(*column))
            .map(|column| ColumnKey::plain(column));

        let columns = ordinary
            .into_iter()
            .chain(split)
            .chain(back)
            .chain(leftovers)
            .collect();

        Schema { columns }
    }

    /// `<prefix><digits>_<field>` for a configured prefix
    fn split_position(&self, key: &str) -> Option<SplitPosition> {
        self.layout
            .split_prefixes
            .iter()
            .enumerate()
            .find_map(|(group, prefix)| {
                let rest = key.strip_prefix(prefix.as_str())?;
                let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
                if digits == 0 {
                    return None;
                }
                let field = rest[digits..].strip_prefix('_')?;
                if field.is_empty() {
                    return None;
                }
                let index = rest[..digits].parse().ok()?;
                Some(SplitPosition {
                    group,
                    index,
                    field: field.to_string(),
                })
            })
    }
}

/// One-shot unification over a complete record sequence
pub fn unify<'a>(layout: SchemaLayout, records: impl IntoIterator<Item = &'a FlatRecord>) -> Schema {
    let mut unifier = SchemaUnifier::new(layout);
    unifier.observe_all(records);
    unifier.finish()
}
