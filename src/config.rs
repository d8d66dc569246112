use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::grid::TradingGrid;

/// Longest pause allowed between pointer moves.
pub const MAX_MOUSE_MOVE_DELAY_SECS: f64 = 5.0;

pub const CONFIG_PATH: &str = "config.json";

pub const NINJA_API_URL: &str = "https://poe.ninja/api/data/ItemOverview";

/// poe.ninja item overview categories that carry unique prices.
pub const PRICE_CATEGORIES: &[&str] = &["UniqueWeapon", "UniqueArmour", "UniqueAccessory", "UniqueJewel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    #[default]
    En,
    De,
    Fr,
    Es,
    Pt,
    Ru,
    Th,
    Ko,
}

impl Language {
    /// Code used in market API query strings.
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::De => "de",
            Language::Fr => "fr",
            Language::Es => "es",
            Language::Pt => "pt",
            Language::Ru => "ru",
            Language::Th => "th",
            Language::Ko => "ko",
        }
    }
}

/// Permanent leagues by name, anything else is the running challenge league.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum League {
    #[default]
    Standard,
    Hardcore,
    Challenge(String),
}

impl From<String> for League {
    fn from(name: String) -> Self {
        match name.trim() {
            "Standard" => League::Standard,
            "Hardcore" => League::Hardcore,
            other => League::Challenge(other.to_string()),
        }
    }
}

impl From<League> for String {
    fn from(league: League) -> Self {
        league.to_string()
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            League::Standard => write!(f, "Standard"),
            League::Hardcore => write!(f, "Hardcore"),
            League::Challenge(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Mean,
    #[default]
    Expected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseSection {
    pub hotkey: String,
    pub refresh_prices_on_start: bool,
    /// Seconds to wait after every cursor move and key press.
    pub mouse_move_delay: f64,
    pub language: Language,
    pub league: League,
    pub window_title: String,
    pub log_level: String,
    pub price_cache_path: String,
    pub blacklist_path: String,
    /// Recorded clipboard captures served by the replay driver.
    pub replay_directory: String,
    pub poll_interval_ms: u64,
}

impl Default for BaseSection {
    fn default() -> Self {
        Self {
            hotkey: "F6".to_string(),
            refresh_prices_on_start: true,
            mouse_move_delay: 0.01,
            language: Language::En,
            league: League::Standard,
            window_title: "Path of Exile".to_string(),
            log_level: "info".to_string(),
            price_cache_path: "prices.db".to_string(),
            blacklist_path: "blacklist.txt".to_string(),
            replay_directory: "captures".to_string(),
            poll_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PriceSection {
    pub unlinked_only: bool,
    pub minimum_mean_chaos_value: f64,
    pub ignore_fated_uniques: bool,
    pub use_blacklist: bool,
    pub min_item_level_restriction: bool,
    pub sort_by: SortBy,
}

impl Default for PriceSection {
    fn default() -> Self {
        Self {
            unlinked_only: true,
            minimum_mean_chaos_value: 0.0,
            ignore_fated_uniques: true,
            use_blacklist: true,
            min_item_level_restriction: false,
            sort_by: SortBy::Expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScreenSection {
    pub grid_top_left_corner_x: i32,
    pub grid_top_left_corner_y: i32,
    pub grid_bottom_right_corner_x: i32,
    pub grid_bottom_right_corner_y: i32,
}

impl Default for ScreenSection {
    fn default() -> Self {
        Self {
            grid_top_left_corner_x: 310,
            grid_top_left_corner_y: 262,
            grid_bottom_right_corner_x: 943,
            grid_bottom_right_corner_y: 841,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "Base")]
    pub base: BaseSection,
    #[serde(rename = "Prices")]
    pub prices: PriceSection,
    #[serde(rename = "Screen")]
    pub screen: ScreenSection,
}

impl Config {
    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Setting up config at {}", path.display());
            let cfg = Config::default();
            cfg.save(path)?;
            return Ok(cfg);
        }

        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)
            .map_err(|e| AppError::ConfigValue(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base.hotkey.trim().is_empty() {
            return Err(AppError::ConfigValue("Hotkey must not be empty".to_string()));
        }
        if self.base.window_title.trim().is_empty() {
            return Err(AppError::ConfigValue("WindowTitle must not be empty".to_string()));
        }
        let delay = self.base.mouse_move_delay;
        if !(0.0..=MAX_MOUSE_MOVE_DELAY_SECS).contains(&delay) {
            return Err(AppError::ConfigValue(format!(
                "MouseMoveDelay must be between 0 and {MAX_MOUSE_MOVE_DELAY_SECS} seconds, got {delay}"
            )));
        }
        let min_chaos = self.prices.minimum_mean_chaos_value;
        if !min_chaos.is_finite() || min_chaos < 0.0 {
            return Err(AppError::ConfigValue(format!(
                "MinimumMeanChaosValue must be a non-negative number, got {min_chaos}"
            )));
        }
        let s = &self.screen;
        if s.grid_top_left_corner_x == s.grid_bottom_right_corner_x
            || s.grid_top_left_corner_y == s.grid_bottom_right_corner_y
        {
            return Err(AppError::ConfigValue(
                "grid corners must span a non-empty rectangle".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grid(&self) -> TradingGrid {
        let s = &self.screen;
        TradingGrid::new(
            (s.grid_top_left_corner_x, s.grid_top_left_corner_y),
            (s.grid_bottom_right_corner_x, s.grid_bottom_right_corner_y),
        )
    }

    pub fn mouse_move_delay(&self) -> Result<Duration> {
        let secs = self.base.mouse_move_delay;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| AppError::ConfigValue(format!("MouseMoveDelay {secs}: {e}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.base.poll_interval_ms)
    }
}
