use statrs::statistics::{Data, Median, Statistics};

use crate::config::PriceSection;
use crate::ignore_list::IgnoreListStore;
use crate::prices::{PriceDataset, ViewMode};

#[derive(Debug, Clone, PartialEq)]
pub struct VariantRow {
    pub name: String,
    pub chaos_value: f64,
    pub listing_count: u32,
    pub level_required: Option<u32>,
    pub fated: bool,
    pub blacklisted: bool,
}

/// Everything the market knows about one base type, ignored variants included.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseDetail {
    pub base: String,
    pub variants: Vec<VariantRow>,
    /// Variants that count towards valuation.
    pub valued: usize,
    pub median_chaos: Option<f64>,
    pub std_dev_chaos: Option<f64>,
}

pub fn inspect_base(data: &PriceDataset, base: &str, prefs: &PriceSection, ignore: &IgnoreListStore) -> BaseDetail {
    let mut variants: Vec<VariantRow> = data
        .view(prefs, ignore, ViewMode::Unfiltered)
        .into_iter()
        .filter(|r| r.row.base_type == base)
        .map(|r| VariantRow {
            chaos_value: r.row.chaos_value,
            listing_count: r.row.listing_count,
            level_required: r.row.level_required,
            fated: r.fated,
            blacklisted: r.blacklisted,
            name: r.name,
        })
        .collect();
    variants.sort_by(|a, b| b.chaos_value.total_cmp(&a.chaos_value));

    let prices: Vec<f64> = variants
        .iter()
        .filter(|v| !v.fated && !v.blacklisted)
        .map(|v| v.chaos_value)
        .collect();

    let valued = prices.len();
    let std_dev_chaos = (valued >= 2).then(|| prices.iter().std_dev());
    let median_chaos = (valued > 0).then(|| Data::new(prices).median());

    BaseDetail {
        base: base.to_string(),
        variants,
        valued,
        median_chaos,
        std_dev_chaos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::PriceRow;

    fn row(name: &str, base: &str, chaos: f64) -> PriceRow {
        PriceRow {
            name: name.to_string(),
            base_type: base.to_string(),
            chaos_value: chaos,
            listing_count: 2,
            links: None,
            level_required: None,
        }
    }

    #[test]
    fn shows_ignored_variants_but_excludes_them_from_stats() {
        let data = PriceDataset::new(vec![
            row("Kaom's Way", "Coral Ring", 50.0),
            row("Ming's Heart", "Coral Ring", 10.0),
            row("Blackheart", "Coral Ring", 2.0),
            row("Perandus Signet", "Coral Ring", 4.0),
            row("Goldrim", "Leather Cap", 1.0),
        ]);
        let mut ignore = IgnoreListStore::new();
        ignore.add_to_blacklist("Blackheart").unwrap();

        let detail = inspect_base(&data, "Coral Ring", &PriceSection::default(), &ignore);
        let names: Vec<_> = detail.variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["Kaom's Way", "Ming's Heart", "Perandus Signet", "Blackheart"]);
        assert!(detail.variants[0].fated);
        assert!(detail.variants[3].blacklisted);

        assert_eq!(detail.valued, 2);
        assert_eq!(detail.median_chaos, Some(7.0));
        let sd = detail.std_dev_chaos.unwrap();
        assert!((sd - 18f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn unknown_base_has_no_stats() {
        let detail = inspect_base(&PriceDataset::default(), "Nothing", &PriceSection::default(), &IgnoreListStore::new());
        assert!(detail.variants.is_empty());
        assert_eq!(detail.median_chaos, None);
        assert_eq!(detail.std_dev_chaos, None);
    }
}
