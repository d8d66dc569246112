use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

/// Uniques that are upgraded through prophecies rather than sold.
pub const FATED_UNIQUES: &[&str] = &[
    "Amplification Rod",
    "Cameria's Avarice",
    "Chaber Cairn",
    "Corona Solaris",
    "Crystal Vault",
    "Death's Opus",
    "Deidbellow",
    "Doedre's Malevolence",
    "Doomfletch's Prism",
    "Dreadbeak",
    "Dreadsurge",
    "Duskblight",
    "Ezomyte Hold",
    "Fox's Fortune",
    "Frostferno",
    "Geofri's Devotion",
    "Geofri's Legacy",
    "Greedtrap",
    "Hrimburn",
    "Hyrri's Demise",
    "Kaltensoul",
    "Kaom's Way",
    "Karui Charge",
    "Malachai's Awakening",
    "Martyr's Crown",
    "Mirebough",
    "Ngamahu Tiki",
    "Panquetzaliztli",
    "Queen's Escape",
    "Realm Ender",
    "Sanguine Gambol",
    "Shavronne's Gambit",
    "Silverbough",
    "Sunspite",
    "The Cauteriser",
    "The Dancing Duo",
    "The Effigon",
    "The Gryphon",
    "The Iron Fortress",
    "The Nomad",
    "The Oak",
    "The Signal Fire",
    "The Stormwall",
    "The Tactician",
    "The Tempest",
    "Thirst for Horrors",
    "Timetwist",
    "Voidheart",
    "Wall of Brambles",
    "Whakatutuki o Matua",
    "Wildwrap",
    "Winterweave",
];

/// Trims and title-cases a name so ignore lists match market rows.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The fated exclusion set plus the user's blacklist, backed by a text file
/// holding one name per line.
pub struct IgnoreListStore {
    fated: BTreeSet<String>,
    blacklist: BTreeSet<String>,
    path: Option<PathBuf>,
}

impl IgnoreListStore {
    /// In-memory store with the shipped fated list and an empty blacklist.
    pub fn new() -> Self {
        Self {
            fated: FATED_UNIQUES.iter().map(|n| normalize_name(n)).collect(),
            blacklist: BTreeSet::new(),
            path: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();

        match fs::read_to_string(&path) {
            Ok(data) => {
                store.blacklist = data
                    .lines()
                    .map(normalize_name)
                    .filter(|n| !n.is_empty())
                    .collect();
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No blacklist at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Loaded {} blacklisted and {} fated names",
            store.blacklist.len(),
            store.fated.len()
        );
        store.path = Some(path);
        Ok(store)
    }

    pub fn is_fated(&self, name: &str) -> bool {
        self.fated.contains(&normalize_name(name))
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.contains(&normalize_name(name))
    }

    pub fn fated(&self) -> impl Iterator<Item = &str> {
        self.fated.iter().map(String::as_str)
    }

    pub fn blacklist(&self) -> impl Iterator<Item = &str> {
        self.blacklist.iter().map(String::as_str)
    }

    /// Returns false when the name was already listed; nothing is written then.
    pub fn add_to_blacklist(&mut self, name: &str) -> Result<bool> {
        let name = normalize_name(name);
        if name.is_empty() || self.blacklist.contains(&name) {
            return Ok(false);
        }

        if let Some(path) = &self.path {
            let unterminated = match fs::read(path) {
                Ok(data) => data.last().is_some_and(|b| *b != b'\n'),
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            if unterminated {
                writeln!(file)?;
            }
            writeln!(file, "{name}")?;
        }
        info!("Blacklisted {name}");
        self.blacklist.insert(name);
        Ok(true)
    }

    /// Rewrites the backing file without every line matching `name`.
    pub fn remove_from_blacklist(&mut self, name: &str) -> Result<bool> {
        let name = normalize_name(name);
        let removed = self.blacklist.remove(&name);

        if let Some(path) = &self.path {
            let data = match fs::read_to_string(path) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(removed),
                Err(e) => return Err(e.into()),
            };
            let kept: String = data
                .lines()
                .filter(|line| normalize_name(line) != name)
                .map(|line| format!("{line}\n"))
                .collect();
            fs::write(path, kept)?;
        }

        if removed {
            info!("Removed {name} from blacklist");
        }
        Ok(removed)
    }
}

impl Default for IgnoreListStore {
    fn default() -> Self {
        Self::new()
    }
}
