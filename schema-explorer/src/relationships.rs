//! Reference inference for procedure parameters
//!
//! Procedure parameters carry no foreign key constraints, so the only signal
//! is the parameter name. The heuristic is best effort and will misfire on
//! generic table names; [`RelationshipOverrides`] corrects individual
//! (procedure, parameter) pairs.

use crate::config::RelationshipOverrides;
use crate::schema::TableName;
use std::collections::HashMap;

pub const ID_SUFFIX: &str = "_id";

/// Context prefixes stripped from a parameter base, first match only
pub const DIRECTIONAL_PREFIXES: [&str; 11] = [
    "new_", "old_", "src_", "dst_", "from_", "to_", "target_", "source_", "current_", "prev_",
    "next_",
];

/// A table together with its primary key columns
#[derive(Debug, Clone, PartialEq)]
pub struct TableKey {
    pub table: TableName,
    pub primary_key: Vec<String>,
}

/// How a reference was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Override,
    TableName,
    PrimaryKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub table: TableName,
    pub source: ResolutionSource,
}

/// Remove at most one directional prefix
pub fn strip_directional_prefix(base: &str) -> &str {
    DIRECTIONAL_PREFIXES
        .iter()
        .find_map(|prefix| base.strip_prefix(prefix))
        .unwrap_or(base)
}

/// Singular and plural spellings a table's base name may appear under
pub fn name_variants(name: &str) -> Vec<String> {
    let base = name.to_lowercase();
    let mut variants = vec![base.clone()];
    if let Some(stem) = base.strip_suffix("ies") {
        variants.push(format!("{}y", stem));
    } else if base.ends_with('s') && !base.ends_with("ss") {
        variants.push(base[..base.len() - 1].to_string());
    } else {
        variants.push(format!("{}s", base));
        variants.push(format!("{}es", base));
    }
    variants
}

/// Map every name variant to its table
///
/// When two tables claim the same variant the later one in `tables` wins.
pub fn name_candidates<'a>(tables: impl IntoIterator<Item = &'a TableName>) -> HashMap<String, TableName> {
    let mut candidates = HashMap::new();
    for table in tables {
        for variant in name_variants(&table.name) {
            candidates.insert(variant, table.clone());
        }
    }
    candidates
}

fn last_token(base: &str) -> Option<&str> {
    base.rsplit_once('_').map(|(_, last)| last)
}

/// Infers referenced tables for `*_id` parameters
pub struct RelationshipResolver<'a> {
    overrides: &'a RelationshipOverrides,
    tables: &'a [TableKey],
    default_schema: &'a str,
    candidates: HashMap<String, TableName>,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(overrides: &'a RelationshipOverrides, tables: &'a [TableKey], default_schema: &'a str) -> Self {
        let candidates = name_candidates(tables.iter().map(|key| &key.table));
        Self {
            overrides,
            tables,
            default_schema,
            candidates,
        }
    }

    /// Referenced table for a parameter, or `None` when nothing matches
    ///
    /// An override for the exact (procedure, parameter) pair is returned
    /// without consulting any heuristic.
    pub fn resolve(&self, procedure: &str, parameter: &str) -> Option<Resolution> {
        if let Some(table) = self.overrides.get(procedure, parameter) {
            return Some(Resolution {
                table: TableName::parse(table, self.default_schema),
                source: ResolutionSource::Override,
            });
        }

        let name = parameter.to_lowercase();
        let base = strip_directional_prefix(name.strip_suffix(ID_SUFFIX)?);
        if base.is_empty() {
            return None;
        }

        if let Some(table) = self.by_name(base) {
            return Some(table);
        }
        self.by_primary_key(base)
    }

    fn by_name(&self, base: &str) -> Option<Resolution> {
        let found = self
            .candidates
            .get(base)
            .or_else(|| last_token(base).and_then(|last| self.candidates.get(last)))?;
        Some(Resolution {
            table: found.clone(),
            source: ResolutionSource::TableName,
        })
    }

    fn by_primary_key(&self, base: &str) -> Option<Resolution> {
        let scan = |base_key: &str| {
            let wanted = format!("{}{}", base_key, ID_SUFFIX);
            self.tables.iter().find(|key| match key.primary_key.as_slice() {
                [only] => only.to_lowercase() == wanted,
                _ => false,
            })
        };
        let found = scan(base).or_else(|| last_token(base).and_then(scan))?;
        Some(Resolution {
            table: found.table.clone(),
            source: ResolutionSource::PrimaryKey,
        })
    }
}
