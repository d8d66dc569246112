use serde::{Deserialize, Serialize};

use crate::config::PriceSection;
use crate::ignore_list::{normalize_name, IgnoreListStore};

/// One market listing line as published by poe.ninja.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRow {
    pub name: String,
    pub base_type: String,
    pub chaos_value: f64,
    #[serde(default)]
    pub listing_count: u32,
    #[serde(default)]
    pub links: Option<u32>,
    #[serde(default)]
    pub level_required: Option<u32>,
}

impl PriceRow {
    pub fn is_linked(&self) -> bool {
        self.links.is_some()
    }
}

/// A price row seen through the current filters.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedRow<'a> {
    pub row: &'a PriceRow,
    pub name: String,
    pub fated: bool,
    pub blacklisted: bool,
}

impl FlaggedRow<'_> {
    pub fn is_ignored(&self) -> bool {
        self.fated || self.blacklisted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Fated and blacklisted rows are left out.
    Filtered,
    /// Every row that passes the link filter, flags attached.
    Unfiltered,
}

/// Price rows loaded for one run. Filtering never removes backing rows.
#[derive(Debug, Clone, Default)]
pub struct PriceDataset {
    rows: Vec<PriceRow>,
}

impl PriceDataset {
    pub fn new(rows: Vec<PriceRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn view(&self, prefs: &PriceSection, ignore: &IgnoreListStore, mode: ViewMode) -> Vec<FlaggedRow<'_>> {
        self.rows
            .iter()
            .filter(|row| !(prefs.unlinked_only && row.is_linked()))
            .map(|row| {
                let name = normalize_name(&row.name);
                let fated = prefs.ignore_fated_uniques && ignore.is_fated(&name);
                let blacklisted = prefs.use_blacklist && ignore.is_blacklisted(&name);
                FlaggedRow { row, name, fated, blacklisted }
            })
            .filter(|flagged| mode == ViewMode::Unfiltered || !flagged.is_ignored())
            .collect()
    }
}
