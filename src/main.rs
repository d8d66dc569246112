mod aggregate;
mod config;
mod driver;
mod error;
mod grid;
mod ignore_list;
mod inspect;
mod item;
mod market;
mod prices;
mod scanner;
mod ui;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use eframe::egui;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CONFIG_PATH};
use crate::driver::ReplayDriver;
use crate::error::Result;
use crate::ignore_list::IgnoreListStore;
use crate::market::NinjaSource;
use crate::scanner::ScanController;
use crate::ui::StashApp;

fn main() -> eframe::Result<()> {
    let cfg = match Config::load_or_create(CONFIG_PATH) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.base.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let app = match build_app(cfg) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([960.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Stash Analyzer",
        options,
        Box::new(|cc| {
            ui::set_custom_style(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
}

fn build_app(cfg: Config) -> Result<StashApp> {
    info!(
        "League {} ({}), hotkey {}, window \"{}\"",
        cfg.base.league,
        cfg.base.language.code(),
        cfg.base.hotkey,
        cfg.base.window_title
    );

    let ignore = Arc::new(RwLock::new(IgnoreListStore::open(&cfg.base.blacklist_path)?));
    let driver = Arc::new(ReplayDriver::from_dir(
        &cfg.base.replay_directory,
        &cfg.base.hotkey,
        &cfg.base.window_title,
    )?);
    let source = Arc::new(NinjaSource::new(&cfg.base.price_cache_path)?);
    let config = Arc::new(RwLock::new(cfg));

    let controller = ScanController::new(driver, source, config.clone(), ignore.clone());
    Ok(StashApp::new(controller, config, PathBuf::from(CONFIG_PATH), ignore))
}
