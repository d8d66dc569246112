use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate, AggregatedRow};
use crate::config::Config;
use crate::driver::ScreenDriver;
use crate::error::Result;
use crate::ignore_list::IgnoreListStore;
use crate::item::{dedup_observed, ItemRecord};
use crate::market::{load_prices, PriceSource};
use crate::prices::{PriceDataset, ViewMode};

/// State published by the scan loop. Written only by the loop, read by the UI.
#[derive(Default)]
pub struct ScanSession {
    running: AtomicBool,
    refresh_pending: AtomicBool,
    cycles: AtomicU64,
    latest_table: RwLock<Arc<Vec<AggregatedRow>>>,
    last_error: RwLock<Option<String>>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns whether a new table arrived since the last call.
    pub fn take_refresh(&self) -> bool {
        self.refresh_pending.swap(false, Ordering::AcqRel)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    pub fn latest_table(&self) -> Arc<Vec<AggregatedRow>> {
        self.latest_table.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_running(&self, v: bool) {
        self.running.store(v, Ordering::Release);
    }

    fn set_error(&self, message: Option<String>) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = message;
    }

    fn publish(&self, table: Vec<AggregatedRow>) {
        *self.latest_table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        self.cycles.fetch_add(1, Ordering::AcqRel);
        self.refresh_pending.store(true, Ordering::Release);
    }
}

/// Receiving half of the single-slot stop hand-off.
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    fn pair() -> (SyncSender<()>, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (tx, Self { rx })
    }

    /// Never blocks. A dropped controller counts as a stop request.
    pub fn is_cancelled(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Starts and stops the background scan loop and owns what it shares with the UI.
pub struct ScanController {
    session: Arc<ScanSession>,
    driver: Arc<dyn ScreenDriver>,
    source: Arc<dyn PriceSource>,
    config: Arc<RwLock<Config>>,
    ignore: Arc<RwLock<IgnoreListStore>>,
    prices: Option<Arc<PriceDataset>>,
    stop_tx: Option<SyncSender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ScanController {
    pub fn new(
        driver: Arc<dyn ScreenDriver>,
        source: Arc<dyn PriceSource>,
        config: Arc<RwLock<Config>>,
        ignore: Arc<RwLock<IgnoreListStore>>,
    ) -> Self {
        Self {
            session: Arc::new(ScanSession::new()),
            driver,
            source,
            config,
            ignore,
            prices: None,
            stop_tx: None,
            worker: None,
        }
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Prices loaded by the most recent start.
    pub fn prices(&self) -> Option<Arc<PriceDataset>> {
        self.prices.clone()
    }

    /// Loads prices and spawns the scan loop. Returns false when a loop is
    /// already running; no second loop is started then.
    pub fn start(&mut self) -> Result<bool> {
        if self.is_busy() {
            return Ok(false);
        }
        let prices = self.price_loader()()?;
        self.start_with_prices(prices)
    }

    /// The blocking half of `start`, detached so it can run off the caller's thread.
    pub fn price_loader(&self) -> impl FnOnce() -> Result<PriceDataset> + Send + 'static {
        let source = Arc::clone(&self.source);
        let cfg = snapshot(&self.config);
        move || {
            cfg.validate()?;
            load_prices(source.as_ref(), &cfg)
        }
    }

    /// Spawns the scan loop over already loaded prices.
    pub fn start_with_prices(&mut self, prices: PriceDataset) -> Result<bool> {
        if self.is_busy() {
            return Ok(false);
        }
        self.reap_worker();

        let cfg = snapshot(&self.config);
        cfg.validate()?;
        let (cell_w, cell_h) = cfg.grid().cell_size();
        debug!("Grid cells are {cell_w:.1} x {cell_h:.1} px");
        let prices = Arc::new(prices);
        info!("Loaded {} price rows", prices.len());
        self.prices = Some(prices.clone());

        let (stop_tx, cancel) = CancelToken::pair();
        let scan = ScanLoop {
            session: self.session.clone(),
            driver: self.driver.clone(),
            config: self.config.clone(),
            ignore: self.ignore.clone(),
            prices,
            cancel,
        };

        self.session.set_error(None);
        self.session.set_running(true);
        let spawned = thread::Builder::new().name("scan-loop".to_string()).spawn(move || scan.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.stop_tx = Some(stop_tx);
                Ok(true)
            }
            Err(e) => {
                self.session.set_running(false);
                Err(e.into())
            }
        }
    }

    /// Asks the loop to stop. Never blocks, and does nothing when idle.
    pub fn stop(&mut self) {
        let Some(tx) = self.stop_tx.take() else {
            debug!("Stop requested while idle");
            return;
        };
        match tx.try_send(()) {
            Ok(()) => info!("Stop requested"),
            Err(TrySendError::Full(())) => debug!("Stop already pending"),
            Err(TrySendError::Disconnected(())) => debug!("Scan loop already exited"),
        }
    }

    /// Stops the loop and waits for it to exit.
    pub fn shutdown(&mut self) {
        self.stop();
        self.reap_worker();
    }

    /// Reaps a loop that already exited, then reports whether one is still running.
    fn is_busy(&mut self) -> bool {
        if self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            self.reap_worker();
        }
        if self.session.is_running() {
            info!("Scan loop already running");
            return true;
        }
        false
    }

    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Scan loop panicked");
                self.session.set_running(false);
            }
        }
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ScanLoop {
    session: Arc<ScanSession>,
    driver: Arc<dyn ScreenDriver>,
    config: Arc<RwLock<Config>>,
    ignore: Arc<RwLock<IgnoreListStore>>,
    prices: Arc<PriceDataset>,
    cancel: CancelToken,
}

impl ScanLoop {
    fn run(self) {
        let _running = RunningGuard(&self.session);
        info!("Scan loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let cfg = snapshot(&self.config);
            if !self.triggered(&cfg) {
                thread::sleep(cfg.poll_interval());
                continue;
            }

            match self.scan_cycle(&cfg) {
                Ok(Some(rows)) => {
                    self.session.set_error(None);
                    debug!("Published {rows} rows");
                }
                Ok(None) => {
                    info!("Sweep abandoned on stop request");
                    break;
                }
                Err(e) => {
                    warn!("Scan cycle failed: {e}");
                    self.session.set_error(Some(e.to_string()));
                    thread::sleep(cfg.poll_interval());
                }
            }
        }
        info!("Scan loop stopped");
    }

    fn triggered(&self, cfg: &Config) -> bool {
        self.driver.is_key_down(&cfg.base.hotkey)
            && self.driver.foreground_window_title().as_deref() == Some(cfg.base.window_title.as_str())
    }

    /// One sweep over the grid. None when a stop arrived mid-sweep.
    fn scan_cycle(&self, cfg: &Config) -> Result<Option<usize>> {
        cfg.validate()?;
        let delay = cfg.mouse_move_delay()?;
        let points = cfg.grid().points();

        self.driver.clear_clipboard()?;
        let mut records = Vec::new();
        for point in &points {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            self.driver.move_cursor(*point)?;
            thread::sleep(delay);
            self.driver.send_copy_hotkey()?;
            thread::sleep(delay);

            let text = self.driver.read_clipboard()?;
            match ItemRecord::parse(&text) {
                Ok(record) => records.push(record),
                Err(e) if e.is_capture_miss() => debug!("No item at ({}, {}): {e}", point.x, point.y),
                Err(e) => return Err(e),
            }
        }

        let observed = dedup_observed(&records);
        let table = {
            let ignore = self.ignore.read().unwrap_or_else(PoisonError::into_inner);
            let view = self.prices.view(&cfg.prices, &ignore, ViewMode::Filtered);
            aggregate(&observed, &view, &cfg.prices)
        };

        let rows = table.len();
        info!(
            "Scanned {} points: {} items, {} distinct, {} rows",
            points.len(),
            records.len(),
            observed.len(),
            rows
        );
        self.session.publish(table);
        Ok(Some(rows))
    }
}

/// Clears the running flag however the loop exits, unwinding included.
struct RunningGuard<'a>(&'a ScanSession);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.set_error(Some("scan loop stopped unexpectedly".to_string()));
        }
        self.0.set_running(false);
    }
}

fn snapshot(config: &RwLock<Config>) -> Config {
    config.read().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Language, League};
    use crate::driver::ReplayDriver;
    use crate::error::AppError;
    use crate::grid::GridPoint;
    use crate::prices::PriceRow;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const RING: &str = "Rarity: Unique\nMing's Heart\nAmethyst Ring\n--------\nItem Level: 80\n";

    struct StubSource {
        rows: Vec<PriceRow>,
    }

    impl PriceSource for StubSource {
        fn fetch_price_rows(&self, _league: &League, _language: Language) -> Result<Vec<PriceRow>> {
            Ok(self.rows.clone())
        }

        fn load_cached_price_rows(&self) -> Result<Vec<PriceRow>> {
            Ok(self.rows.clone())
        }

        fn store_price_rows(&self, _rows: &[PriceRow]) -> Result<()> {
            Ok(())
        }
    }

    /// Counts copies and lets a test pick the focused window.
    struct FocusDriver {
        title: Mutex<String>,
        copies: AtomicUsize,
    }

    impl ScreenDriver for FocusDriver {
        fn move_cursor(&self, _point: GridPoint) -> Result<()> {
            Ok(())
        }
        fn send_copy_hotkey(&self) -> Result<()> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn read_clipboard(&self) -> Result<String> {
            Ok(RING.to_string())
        }
        fn clear_clipboard(&self) -> Result<()> {
            Ok(())
        }
        fn is_key_down(&self, _key: &str) -> bool {
            true
        }
        fn foreground_window_title(&self) -> Option<String> {
            Some(self.title.lock().unwrap().clone())
        }
    }

    /// Holds the given copy until the test releases it.
    struct GateDriver {
        copies: AtomicUsize,
        hold_at: usize,
        gate: Mutex<Receiver<()>>,
    }

    impl ScreenDriver for GateDriver {
        fn move_cursor(&self, _point: GridPoint) -> Result<()> {
            Ok(())
        }
        fn send_copy_hotkey(&self) -> Result<()> {
            if self.copies.fetch_add(1, Ordering::SeqCst) + 1 == self.hold_at {
                self.gate.lock().unwrap().recv().ok();
            }
            Ok(())
        }
        fn read_clipboard(&self) -> Result<String> {
            Ok(RING.to_string())
        }
        fn clear_clipboard(&self) -> Result<()> {
            Ok(())
        }
        fn is_key_down(&self, _key: &str) -> bool {
            true
        }
        fn foreground_window_title(&self) -> Option<String> {
            Some("Path of Exile".to_string())
        }
    }

    /// Crashes on the first clipboard read, then behaves.
    struct CrashOnceDriver {
        crashed: AtomicBool,
    }

    impl ScreenDriver for CrashOnceDriver {
        fn move_cursor(&self, _point: GridPoint) -> Result<()> {
            Ok(())
        }
        fn send_copy_hotkey(&self) -> Result<()> {
            Ok(())
        }
        fn read_clipboard(&self) -> Result<String> {
            if !self.crashed.swap(true, Ordering::SeqCst) {
                panic!("clipboard backend crashed");
            }
            Ok(RING.to_string())
        }
        fn clear_clipboard(&self) -> Result<()> {
            Ok(())
        }
        fn is_key_down(&self, _key: &str) -> bool {
            true
        }
        fn foreground_window_title(&self) -> Option<String> {
            Some("Path of Exile".to_string())
        }
    }

    fn ring_prices() -> Vec<PriceRow> {
        vec![
            PriceRow {
                name: "Ming's Heart".into(),
                base_type: "Amethyst Ring".into(),
                chaos_value: 30.0,
                listing_count: 1,
                links: None,
                level_required: Some(69),
            },
            PriceRow {
                name: "Praxis".into(),
                base_type: "Paua Ring".into(),
                chaos_value: 1.0,
                listing_count: 9,
                links: None,
                level_required: None,
            },
        ]
    }

    fn fast_config() -> Arc<RwLock<Config>> {
        let mut cfg = Config::default();
        cfg.base.mouse_move_delay = 0.0;
        cfg.base.poll_interval_ms = 1;
        Arc::new(RwLock::new(cfg))
    }

    fn controller(driver: Arc<dyn ScreenDriver>, rows: Vec<PriceRow>) -> (ScanController, Arc<RwLock<Config>>) {
        let config = fast_config();
        let ctl = ScanController::new(
            driver,
            Arc::new(StubSource { rows }),
            config.clone(),
            Arc::new(RwLock::new(IgnoreListStore::new())),
        );
        (ctl, config)
    }

    fn replay() -> Arc<dyn ScreenDriver> {
        Arc::new(ReplayDriver::new(vec![RING.to_string(), "garbage".to_string()], "F6", "Path of Exile"))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let (mut ctl, _) = controller(replay(), ring_prices());
        ctl.stop();
        ctl.stop();
        assert!(!ctl.session().is_running());
        assert!(ctl.session().latest_table().is_empty());
        assert_eq!(ctl.session().last_error(), None);
    }

    #[test]
    fn scan_publishes_ranked_table() {
        let (mut ctl, _) = controller(replay(), ring_prices());
        assert!(ctl.start().unwrap());
        assert!(ctl.session().is_running());
        assert!(wait_until(|| ctl.session().cycles_completed() >= 1));

        let table = ctl.session().latest_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].base, "Amethyst Ring");
        assert_eq!(table[0].item_level, Some(80));
        assert_eq!(table[0].expected_chaos, 30.0);
        assert!(ctl.session().take_refresh());

        ctl.shutdown();
        assert!(!ctl.session().is_running());
    }

    #[test]
    fn second_start_does_not_spawn_another_loop() {
        let (mut ctl, _) = controller(replay(), ring_prices());
        assert!(ctl.start().unwrap());
        assert!(!ctl.start().unwrap());
        ctl.shutdown();
        assert!(!ctl.session().is_running());

        assert!(ctl.start().unwrap());
        ctl.shutdown();
        assert!(!ctl.session().is_running());
    }

    #[test]
    fn unfocused_window_never_scans() {
        let driver = Arc::new(FocusDriver { title: Mutex::new("Notepad".into()), copies: AtomicUsize::new(0) });
        let (mut ctl, _) = controller(driver.clone(), ring_prices());
        assert!(ctl.start().unwrap());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(driver.copies.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.session().cycles_completed(), 0);

        *driver.title.lock().unwrap() = "Path of Exile".into();
        assert!(wait_until(|| ctl.session().cycles_completed() >= 1));
        assert!(driver.copies.load(Ordering::SeqCst) >= 132);
        ctl.shutdown();
    }

    #[test]
    fn start_without_prices_fails() {
        let (mut ctl, _) = controller(replay(), vec![]);
        let err = ctl.start().unwrap_err();
        assert!(matches!(err, AppError::DataFetch(_)));
        assert!(!ctl.session().is_running());
    }

    #[test]
    fn bad_config_aborts_the_cycle_but_not_the_loop() {
        let (mut ctl, config) = controller(replay(), ring_prices());
        assert!(ctl.start().unwrap());
        config.write().unwrap().prices.minimum_mean_chaos_value = f64::NAN;

        assert!(wait_until(|| ctl.session().last_error().is_some()));
        assert!(ctl.session().is_running());
        assert!(ctl.session().last_error().unwrap().contains("MinimumMeanChaosValue"));

        config.write().unwrap().prices.minimum_mean_chaos_value = 0.0;
        assert!(wait_until(|| ctl.session().last_error().is_none()));
        ctl.shutdown();
    }

    #[test]
    fn stop_mid_sweep_publishes_nothing() {
        let (release, gate) = mpsc::channel();
        let driver = Arc::new(GateDriver { copies: AtomicUsize::new(0), hold_at: 3, gate: Mutex::new(gate) });
        let (mut ctl, _) = controller(driver.clone(), ring_prices());
        assert!(ctl.start().unwrap());
        assert!(wait_until(|| driver.copies.load(Ordering::SeqCst) == 3));

        ctl.stop();
        release.send(()).unwrap();
        assert!(wait_until(|| !ctl.session().is_running()));
        ctl.shutdown();

        assert_eq!(driver.copies.load(Ordering::SeqCst), 3);
        assert_eq!(ctl.session().cycles_completed(), 0);
        assert!(ctl.session().latest_table().is_empty());
        assert!(!ctl.session().take_refresh());
    }

    #[test]
    fn oversized_mouse_delay_is_reported_and_loop_survives() {
        let (mut ctl, config) = controller(replay(), ring_prices());
        config.write().unwrap().base.mouse_move_delay = 1e20;
        assert!(matches!(ctl.start(), Err(AppError::ConfigValue(_))));
        assert!(!ctl.session().is_running());

        config.write().unwrap().base.mouse_move_delay = 0.0;
        assert!(ctl.start().unwrap());
        config.write().unwrap().base.mouse_move_delay = 1e20;
        assert!(wait_until(|| ctl
            .session()
            .last_error()
            .is_some_and(|e| e.contains("MouseMoveDelay"))));
        assert!(ctl.session().is_running());

        config.write().unwrap().base.mouse_move_delay = 0.0;
        assert!(wait_until(|| ctl.session().last_error().is_none()));
        assert!(!ctl.start().unwrap());
        ctl.shutdown();
    }

    #[test]
    fn crashed_loop_is_reported_and_can_restart() {
        let driver = Arc::new(CrashOnceDriver { crashed: AtomicBool::new(false) });
        let (mut ctl, _) = controller(driver, ring_prices());
        assert!(ctl.start().unwrap());
        assert!(wait_until(|| !ctl.session().is_running()));
        assert!(ctl.session().last_error().is_some());

        assert!(ctl.start().unwrap());
        assert!(wait_until(|| ctl.session().cycles_completed() >= 1));
        assert_eq!(ctl.session().last_error(), None);
        ctl.shutdown();
        assert!(!ctl.session().is_running());
    }

    #[test]
    fn prices_loaded_off_thread_start_the_loop() {
        let (mut ctl, _) = controller(replay(), ring_prices());
        let load = ctl.price_loader();
        let prices = thread::spawn(load).join().unwrap().unwrap();
        assert_eq!(prices.len(), 2);

        assert!(ctl.start_with_prices(prices).unwrap());
        assert!(wait_until(|| ctl.session().cycles_completed() >= 1));
        assert_eq!(ctl.prices().map(|p| p.len()), Some(2));
        ctl.shutdown();

        let (empty, _) = controller(replay(), vec![]);
        let err = thread::spawn(empty.price_loader()).join().unwrap().unwrap_err();
        assert!(matches!(err, AppError::DataFetch(_)));
    }
}
