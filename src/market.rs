use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, Language, League, NINJA_API_URL, PRICE_CATEGORIES};
use crate::error::{AppError, Result};
use crate::prices::{PriceDataset, PriceRow};

/// Where price rows come from: the live market and the last saved snapshot.
pub trait PriceSource: Send + Sync {
    fn fetch_price_rows(&self, league: &League, language: Language) -> Result<Vec<PriceRow>>;

    fn load_cached_price_rows(&self) -> Result<Vec<PriceRow>>;

    fn store_price_rows(&self, rows: &[PriceRow]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ItemOverview {
    lines: Vec<PriceRow>,
}

pub struct NinjaClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl NinjaClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, base_url: NINJA_API_URL.to_string() })
    }

    pub fn fetch_price_rows(&self, league: &League, language: Language) -> Result<Vec<PriceRow>> {
        info!("Fetching {} prices from poe.ninja", league);
        let mut rows = Vec::new();
        let league = league.to_string();
        for category in PRICE_CATEGORIES {
            let resp = self
                .http
                .get(&self.base_url)
                .query(&[("league", league.as_str()), ("type", *category), ("language", language.code())])
                .send()?
                .error_for_status()?;
            let overview: ItemOverview = resp.json()?;
            debug!("{category}: {} lines", overview.lines.len());
            rows.extend(overview.lines);
        }
        Ok(rows)
    }
}

/// Last fetched price snapshot, kept in SQLite between runs.
pub struct PriceCache {
    path: PathBuf,
}

impl PriceCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS price_rows (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 base_type TEXT NOT NULL,
                 chaos_value REAL NOT NULL,
                 listing_count INTEGER NOT NULL,
                 links INTEGER,
                 level_required INTEGER,
                 fetched_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
             )",
        )?;
        Ok(conn)
    }

    pub fn save(&self, rows: &[PriceRow]) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM price_rows", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO price_rows (name, base_type, chaos_value, listing_count, links, level_required)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.name,
                    row.base_type,
                    row.chaos_value,
                    row.listing_count,
                    row.links,
                    row.level_required,
                ])?;
            }
        }
        tx.commit()?;
        info!("Cached {} price rows at {}", rows.len(), self.path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<PriceRow>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT name, base_type, chaos_value, listing_count, links, level_required
             FROM price_rows
             ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PriceRow {
                name: row.get(0)?,
                base_type: row.get(1)?,
                chaos_value: row.get(2)?,
                listing_count: row.get(3)?,
                links: row.get(4)?,
                level_required: row.get(5)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// poe.ninja for fresh prices, SQLite for the fallback snapshot.
pub struct NinjaSource {
    client: NinjaClient,
    cache: PriceCache,
}

impl NinjaSource {
    pub fn new(cache_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            client: NinjaClient::new()?,
            cache: PriceCache::new(cache_path),
        })
    }
}

impl PriceSource for NinjaSource {
    fn fetch_price_rows(&self, league: &League, language: Language) -> Result<Vec<PriceRow>> {
        self.client.fetch_price_rows(league, language)
    }

    fn load_cached_price_rows(&self) -> Result<Vec<PriceRow>> {
        self.cache.load()
    }

    fn store_price_rows(&self, rows: &[PriceRow]) -> Result<()> {
        self.cache.save(rows)
    }
}

/// Fetches fresh prices when configured to, falling back to the cached
/// snapshot. An empty result is an error: nothing could be valued.
pub fn load_prices(source: &dyn PriceSource, cfg: &Config) -> Result<PriceDataset> {
    if cfg.base.refresh_prices_on_start {
        match source.fetch_price_rows(&cfg.base.league, cfg.base.language) {
            Ok(rows) if !rows.is_empty() => {
                if let Err(e) = source.store_price_rows(&rows) {
                    warn!("Could not cache prices: {e}");
                }
                return Ok(PriceDataset::new(rows));
            }
            Ok(_) => warn!("Market returned no price rows, using cached prices"),
            Err(e) => warn!("Price fetch failed ({e}), using cached prices"),
        }
    }

    info!("Loading saved prices");
    let rows = source.load_cached_price_rows()?;
    if rows.is_empty() {
        return Err(AppError::DataFetch(
            "no price data available, fetch prices first".to_string(),
        ));
    }
    Ok(PriceDataset::new(rows))
}
