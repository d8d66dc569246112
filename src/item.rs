use std::collections::{BTreeMap, HashSet};

use crate::error::{AppError, Result};

/// Line the game uses to separate sections of a copied item.
pub const SECTION_DIVIDER: &str = "--------";

pub const ITEM_LEVEL_KEY: &str = "Item Level";

/// Properties pulled out of one clipboard capture. Always holds `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    base: String,
    properties: BTreeMap<String, String>,
}

impl ItemRecord {
    pub fn parse(text: &str) -> Result<Self> {
        let header = text.split(SECTION_DIVIDER).next().unwrap_or_default();
        let base = header
            .lines()
            .nth(2)
            .map(|line| line.trim().to_string())
            .filter(|base| !base.is_empty())
            .ok_or_else(|| {
                AppError::CaptureParse(format!(
                    "expected a base type on header line 3, got {} header lines",
                    header.lines().count()
                ))
            })?;

        let mut properties = BTreeMap::new();
        properties.insert("base".to_string(), base.clone());

        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Ok(Self { base, properties })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn item_level(&self) -> Option<u32> {
        self.get(ITEM_LEVEL_KEY).and_then(|v| v.parse().ok())
    }

    pub fn observed(&self) -> ObservedItem {
        ObservedItem {
            base: self.base.clone(),
            item_level: self.item_level(),
        }
    }
}

/// The projection of a capture that takes part in valuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservedItem {
    pub base: String,
    pub item_level: Option<u32>,
}

/// Collapses captures sharing `{base, Item Level}`, keeping first-seen order.
pub fn dedup_observed(records: &[ItemRecord]) -> Vec<ObservedItem> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(ItemRecord::observed)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELM: &str = "Rarity: Unique\r\nAbyssus\r\nEzomyte Burgonet\r\n--------\r\nArmour: 380\r\n--------\r\nItem Level: 75\r\n--------\r\nNote: ~price 5 chaos\r\n";

    #[test]
    fn parses_base_from_third_header_line() {
        let item = ItemRecord::parse(HELM).unwrap();
        assert_eq!(item.base(), "Ezomyte Burgonet");
        assert_eq!(item.get("base"), Some("Ezomyte Burgonet"));
        assert_eq!(item.get("Rarity"), Some("Unique"));
        assert_eq!(item.item_level(), Some(75));
    }

    #[test]
    fn value_keeps_text_after_first_colon() {
        let item = ItemRecord::parse("a\nb\nBase\n--------\nNote: ~b/o 1:2 chaos\n").unwrap();
        assert_eq!(item.get("Note"), Some("~b/o 1:2 chaos"));
    }

    #[test]
    fn later_keys_overwrite_earlier_ones() {
        let item = ItemRecord::parse("a\nb\nBase\n--------\nQuality: +5%\nQuality: +20%\n").unwrap();
        assert_eq!(item.get("Quality"), Some("+20%"));
    }

    #[test]
    fn parsing_is_idempotent() {
        assert_eq!(ItemRecord::parse(HELM).unwrap(), ItemRecord::parse(HELM).unwrap());
    }

    #[test]
    fn short_header_is_a_capture_miss() {
        let err = ItemRecord::parse("Rarity: Unique\nAbyssus\n--------\n").unwrap_err();
        assert!(err.is_capture_miss());
        assert!(ItemRecord::parse(" ").unwrap_err().is_capture_miss());
        assert!(ItemRecord::parse("").unwrap_err().is_capture_miss());
    }

    #[test]
    fn dedup_keys_on_base_and_item_level() {
        let a = ItemRecord::parse("r\nn\nBase A\n--------\nItem Level: 80\n").unwrap();
        let a_other_note = ItemRecord::parse("r\nn\nBase A\n--------\nItem Level: 80\nNote: x\n").unwrap();
        let a_other_level = ItemRecord::parse("r\nn\nBase A\n--------\nItem Level: 70\n").unwrap();
        let b = ItemRecord::parse("r\nn\nBase B\n").unwrap();

        let observed = dedup_observed(&[a.clone(), b, a, a_other_note, a_other_level]);
        assert_eq!(
            observed,
            vec![
                ObservedItem { base: "Base A".into(), item_level: Some(80) },
                ObservedItem { base: "Base B".into(), item_level: None },
                ObservedItem { base: "Base A".into(), item_level: Some(70) },
            ]
        );
    }
}
