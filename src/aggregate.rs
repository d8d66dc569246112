use std::collections::BTreeMap;

use crate::config::{PriceSection, SortBy};
use crate::item::ObservedItem;
use crate::prices::{FlaggedRow, PriceRow};

/// One line of the ranked table shown to the player.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub base: String,
    pub item_level: Option<u32>,
    /// Market rows (item variants) behind this base type.
    pub items: usize,
    pub listings: u64,
    pub chaos_min: f64,
    pub chaos_mean: f64,
    pub chaos_max: f64,
    /// Listing-weighted average chaos value.
    pub expected_chaos: f64,
}

impl AggregatedRow {
    fn sort_key(&self, sort_by: SortBy) -> f64 {
        match sort_by {
            SortBy::Mean => self.chaos_mean,
            SortBy::Expected => self.expected_chaos,
        }
    }

    fn rounded(mut self) -> Self {
        self.chaos_min = round_to(self.chaos_min, 1);
        self.chaos_mean = round_to(self.chaos_mean, 1);
        self.chaos_max = round_to(self.chaos_max, 1);
        self.expected_chaos = round_to(self.expected_chaos, 3);
        self
    }
}

/// Running totals for one base type.
#[derive(Debug, Clone, Copy)]
struct BaseStats {
    count: usize,
    min: f64,
    max: f64,
    chaos_sum: f64,
    listings: u64,
    ev_sum: f64,
}

impl Default for BaseStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            chaos_sum: 0.0,
            listings: 0,
            ev_sum: 0.0,
        }
    }
}

impl BaseStats {
    fn push(&mut self, row: &PriceRow) {
        self.count += 1;
        self.min = self.min.min(row.chaos_value);
        self.max = self.max.max(row.chaos_value);
        self.chaos_sum += row.chaos_value;
        self.listings += u64::from(row.listing_count);
        self.ev_sum += row.chaos_value * f64::from(row.listing_count);
    }

    fn mean(&self) -> f64 {
        self.chaos_sum / self.count as f64
    }

    /// None when nothing is listed, so no expectation exists.
    fn expected(&self) -> Option<f64> {
        (self.count > 0 && self.listings > 0).then(|| self.ev_sum / self.listings as f64)
    }
}

struct BaseGroup<'a> {
    stats: BaseStats,
    rows: Vec<&'a PriceRow>,
}

impl BaseGroup<'_> {
    /// Stats over the rows an item of `item_level` can use.
    fn stats_for(&self, item_level: Option<u32>) -> BaseStats {
        let Some(level) = item_level else {
            return self.stats;
        };
        let mut stats = BaseStats::default();
        for row in self.rows.iter().filter(|r| r.level_required.is_none_or(|req| req <= level)) {
            stats.push(row);
        }
        stats
    }
}

/// Values the observed base types against the filtered price view and ranks them.
pub fn aggregate(observed: &[ObservedItem], view: &[FlaggedRow<'_>], prefs: &PriceSection) -> Vec<AggregatedRow> {
    let mut groups: BTreeMap<&str, BaseGroup<'_>> = BTreeMap::new();
    for flagged in view {
        let group = groups.entry(flagged.row.base_type.as_str()).or_insert_with(|| BaseGroup {
            stats: BaseStats::default(),
            rows: Vec::new(),
        });
        group.stats.push(flagged.row);
        group.rows.push(flagged.row);
    }

    // Group order first, observation order within a base.
    let mut joined: Vec<&ObservedItem> = observed.iter().filter(|o| groups.contains_key(o.base.as_str())).collect();
    joined.sort_by(|a, b| a.base.cmp(&b.base));

    let mut table: Vec<AggregatedRow> = joined
        .into_iter()
        .filter_map(|item| {
            let group = groups.get(item.base.as_str())?;
            let level_cap = if prefs.min_item_level_restriction { item.item_level } else { None };
            let stats = group.stats_for(level_cap);
            let expected_chaos = stats.expected()?;
            Some(AggregatedRow {
                base: item.base.clone(),
                item_level: item.item_level,
                items: stats.count,
                listings: stats.listings,
                chaos_min: stats.min,
                chaos_mean: stats.mean(),
                chaos_max: stats.max,
                expected_chaos,
            })
        })
        .filter(|row| row.chaos_mean >= prefs.minimum_mean_chaos_value)
        .collect();

    table.sort_by(|a, b| b.sort_key(prefs.sort_by).total_cmp(&a.sort_key(prefs.sort_by)));

    table.into_iter().map(AggregatedRow::rounded).collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
