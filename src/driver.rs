use std::fs;
use std::path::Path;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::grid::GridPoint;

/// Mouse, keyboard, clipboard and window access used by a scan.
/// Every call blocks until the action has completed.
pub trait ScreenDriver: Send + Sync {
    fn move_cursor(&self, point: GridPoint) -> Result<()>;

    fn send_copy_hotkey(&self) -> Result<()>;

    fn read_clipboard(&self) -> Result<String>;

    fn clear_clipboard(&self) -> Result<()>;

    fn is_key_down(&self, key: &str) -> bool;

    fn foreground_window_title(&self) -> Option<String>;
}

struct ReplayState {
    next: usize,
    clipboard: String,
}

/// Serves recorded clipboard captures, one per copy, cycling through them.
/// The configured hotkey always reads as held and the game window as focused.
pub struct ReplayDriver {
    captures: Vec<String>,
    hotkey: String,
    window_title: String,
    state: Mutex<ReplayState>,
}

impl ReplayDriver {
    pub fn new(captures: Vec<String>, hotkey: &str, window_title: &str) -> Self {
        Self {
            captures,
            hotkey: hotkey.to_string(),
            window_title: window_title.to_string(),
            state: Mutex::new(ReplayState { next: 0, clipboard: String::new() }),
        }
    }

    /// Loads every `*.txt` capture in `dir`, ordered by file name.
    pub fn from_dir(dir: impl AsRef<Path>, hotkey: &str, window_title: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
                .collect(),
            Err(e) => {
                warn!("Replay directory {} unreadable: {e}", dir.display());
                Vec::new()
            }
        };
        paths.sort();

        let captures = paths
            .iter()
            .map(fs::read_to_string)
            .collect::<std::io::Result<Vec<_>>>()?;
        info!("Replay driver loaded {} captures from {}", captures.len(), dir.display());
        Ok(Self::new(captures, hotkey, window_title))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReplayState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Driver("replay state poisoned".to_string()))
    }
}

impl ScreenDriver for ReplayDriver {
    fn move_cursor(&self, _point: GridPoint) -> Result<()> {
        Ok(())
    }

    fn send_copy_hotkey(&self) -> Result<()> {
        let mut state = self.lock()?;
        if self.captures.is_empty() {
            return Ok(());
        }
        let idx = state.next % self.captures.len();
        state.clipboard = self.captures[idx].clone();
        state.next = idx + 1;
        Ok(())
    }

    fn read_clipboard(&self) -> Result<String> {
        Ok(self.lock()?.clipboard.clone())
    }

    fn clear_clipboard(&self) -> Result<()> {
        self.lock()?.clipboard = " ".to_string();
        Ok(())
    }

    fn is_key_down(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(&self.hotkey)
    }

    fn foreground_window_title(&self) -> Option<String> {
        Some(self.window_title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT: GridPoint = GridPoint { x: 0.0, y: 0.0 };

    #[test]
    fn copies_cycle_through_captures() {
        let driver = ReplayDriver::new(vec!["one".into(), "two".into()], "F6", "Path of Exile");
        driver.clear_clipboard().unwrap();
        assert_eq!(driver.read_clipboard().unwrap(), " ");

        let mut seen = Vec::new();
        for _ in 0..3 {
            driver.move_cursor(POINT).unwrap();
            driver.send_copy_hotkey().unwrap();
            seen.push(driver.read_clipboard().unwrap());
        }
        assert_eq!(seen, vec!["one", "two", "one"]);
    }

    #[test]
    fn reports_configured_hotkey_and_window() {
        let driver = ReplayDriver::new(vec![], "F6", "Path of Exile");
        assert!(driver.is_key_down("f6"));
        assert!(!driver.is_key_down("F7"));
        assert_eq!(driver.foreground_window_title().as_deref(), Some("Path of Exile"));

        driver.send_copy_hotkey().unwrap();
        assert_eq!(driver.read_clipboard().unwrap(), "");
    }

    #[test]
    fn loads_txt_captures_sorted_by_name() {
        let dir = std::env::temp_dir().join(format!("stash_replay_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.txt"), "second").unwrap();
        fs::write(dir.join("a.txt"), "first").unwrap();
        fs::write(dir.join("notes.md"), "skip").unwrap();

        let driver = ReplayDriver::from_dir(&dir, "F6", "Path of Exile").unwrap();
        driver.send_copy_hotkey().unwrap();
        assert_eq!(driver.read_clipboard().unwrap(), "first");

        fs::remove_dir_all(&dir).ok();
    }
}
