use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Color32, Context, FontId, Margin, RichText, Stroke, TextStyle, Vec2, Visuals};
use egui_extras::{Column, TableBuilder};
use egui_plot::{Bar, BarChart, Plot};
use tracing::{error, warn};

use crate::aggregate::AggregatedRow;
use crate::config::{Config, SortBy};
use crate::error::{AppError, Result};
use crate::ignore_list::IgnoreListStore;
use crate::inspect::{inspect_base, BaseDetail};
use crate::prices::PriceDataset;
use crate::scanner::ScanController;

/// How often published scan results are picked up.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const LOADING_REPAINT: Duration = Duration::from_millis(100);

const GOLD: Color32 = Color32::from_rgb(200, 160, 90);
const PARCHMENT: Color32 = Color32::from_rgb(190, 175, 145);
const MUTED: Color32 = Color32::from_rgb(140, 125, 100);
const UNIQUE: Color32 = Color32::from_rgb(175, 96, 37);
const BORDER: Color32 = Color32::from_rgb(70, 58, 40);

pub fn set_custom_style(ctx: &Context) {
    let mut visuals = Visuals::dark();
    visuals.panel_fill = Color32::from_rgb(14, 12, 10);
    visuals.window_fill = Color32::from_rgb(22, 19, 15);
    visuals.extreme_bg_color = Color32::from_rgb(30, 26, 20);
    visuals.faint_bg_color = Color32::from_rgb(26, 22, 17);
    visuals.window_stroke = Stroke::new(1.0, BORDER);
    visuals.hyperlink_color = GOLD;

    let widgets = &mut visuals.widgets;
    let states = [
        (&mut widgets.inactive, Color32::from_rgb(38, 32, 24), Stroke::new(1.0, BORDER)),
        (&mut widgets.hovered, Color32::from_rgb(58, 48, 34), Stroke::new(1.5, GOLD)),
        (&mut widgets.active, Color32::from_rgb(76, 62, 42), Stroke::new(2.0, GOLD)),
    ];
    for (state, fill, stroke) in states {
        state.bg_fill = fill;
        state.weak_bg_fill = fill;
        state.bg_stroke = stroke;
    }
    visuals.selection.bg_fill = Color32::from_rgb(90, 66, 36);
    visuals.selection.stroke = Stroke::new(1.0, PARCHMENT);
    ctx.set_visuals(visuals);

    ctx.style_mut(|style| {
        style.spacing.item_spacing = egui::vec2(6.0, 5.0);
        style.spacing.button_padding = egui::vec2(10.0, 5.0);
        style.spacing.interact_size.y = 24.0;
        for (text_style, size) in [
            (TextStyle::Small, 12.0),
            (TextStyle::Body, 14.5),
            (TextStyle::Button, 14.5),
            (TextStyle::Heading, 19.0),
        ] {
            style.text_styles.insert(text_style, FontId::proportional(size));
        }
        style.text_styles.insert(TextStyle::Monospace, FontId::monospace(13.0));
    });
}

pub struct StashApp {
    controller: ScanController,
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    ignore: Arc<RwLock<IgnoreListStore>>,

    table: Arc<Vec<AggregatedRow>>,
    last_poll: Instant,
    loading: Option<Receiver<Result<PriceDataset>>>,

    selected_base: Option<String>,
    detail: Option<BaseDetail>,

    blacklist_input: String,
    status: Option<String>,
}

impl StashApp {
    pub fn new(
        controller: ScanController,
        config: Arc<RwLock<Config>>,
        config_path: PathBuf,
        ignore: Arc<RwLock<IgnoreListStore>>,
    ) -> Self {
        Self {
            controller,
            config,
            config_path,
            ignore,
            table: Arc::new(Vec::new()),
            last_poll: Instant::now(),
            loading: None,
            selected_base: None,
            detail: None,
            blacklist_input: String::new(),
            status: None,
        }
    }

    fn poll_session(&mut self) {
        if self.last_poll.elapsed() < POLL_INTERVAL {
            return;
        }
        self.last_poll = Instant::now();
        if self.controller.session().take_refresh() {
            self.table = self.controller.session().latest_table();
            self.refresh_detail();
        }
    }

    /// Fetches prices on a helper thread; the scan starts once they arrive.
    fn start_scan(&mut self) {
        if self.loading.is_some() {
            return;
        }
        let load = self.controller.price_loader();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new().name("price-load".to_string()).spawn(move || {
            tx.send(load()).ok();
        });
        self.status = match spawned {
            Ok(_) => {
                self.loading = Some(rx);
                Some("Loading prices...".to_string())
            }
            Err(e) => {
                error!("Could not spawn price loader: {e}");
                Some(format!("Could not start: {e}"))
            }
        };
    }

    fn poll_price_load(&mut self) {
        let Some(rx) = &self.loading else {
            return;
        };
        let loaded = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(AppError::DataFetch("price loader exited".to_string())),
        };
        self.loading = None;

        self.status = match loaded.and_then(|prices| self.controller.start_with_prices(prices)) {
            Ok(true) => None,
            Ok(false) => Some("Scan already running".to_string()),
            Err(e) => {
                error!("Could not start scanning: {e}");
                Some(format!("Could not start: {e}"))
            }
        };
        self.refresh_detail();
    }

    fn save_config(&mut self) {
        let cfg = self.config.read().unwrap_or_else(PoisonError::into_inner).clone();
        self.status = match cfg.validate().and_then(|_| cfg.save(&self.config_path)) {
            Ok(()) => Some(format!("Settings saved to {}", self.config_path.display())),
            Err(e) => Some(format!("Settings not saved: {e}")),
        };
    }

    fn blacklist(&mut self, name: &str, add: bool) {
        let mut ignore = self.ignore.write().unwrap_or_else(PoisonError::into_inner);
        let result = if add {
            ignore.add_to_blacklist(name)
        } else {
            ignore.remove_from_blacklist(name)
        };
        drop(ignore);

        if let Err(e) = result {
            warn!("Blacklist update failed: {e}");
            self.status = Some(format!("Blacklist not updated: {e}"));
        }
        self.refresh_detail();
    }

    fn refresh_detail(&mut self) {
        let (Some(base), Some(prices)) = (&self.selected_base, self.controller.prices()) else {
            self.detail = None;
            return;
        };
        let cfg = self.config.read().unwrap_or_else(PoisonError::into_inner);
        let ignore = self.ignore.read().unwrap_or_else(PoisonError::into_inner);
        self.detail = Some(inspect_base(&prices, base, &cfg.prices, &ignore));
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.heading(RichText::new("Stash Analyzer").color(GOLD).strong().size(22.0));
        });
        ui.add_space(4.0);
        ui.separator();

        ui.horizontal(|ui| {
            let running = self.controller.session().is_running();

            let start = ui.add_enabled(
                !running && self.loading.is_none(),
                egui::Button::new(RichText::new("▶ Start").color(GOLD).strong()).min_size(Vec2::new(90.0, 30.0)),
            );
            if start.clicked() {
                self.start_scan();
            }

            let stop = ui.add_enabled(
                running,
                egui::Button::new(RichText::new("■ Stop").color(Color32::from_rgb(230, 130, 120)))
                    .min_size(Vec2::new(90.0, 30.0)),
            );
            if stop.clicked() {
                self.controller.stop();
            }

            ui.separator();

            let session = self.controller.session();
            if running {
                let hotkey = self.config.read().unwrap_or_else(PoisonError::into_inner).base.hotkey.clone();
                ui.label(RichText::new(format!("● Scanning, hold {hotkey}")).color(Color32::from_rgb(120, 200, 110)));
            } else {
                ui.label(RichText::new("○ Idle").color(MUTED));
            }
            ui.label(RichText::new(format!("{} sweeps", session.cycles_completed())).color(MUTED));

            if let Some(prices) = self.controller.prices() {
                let text = if prices.is_empty() {
                    "no prices".to_string()
                } else {
                    format!("{} price rows", prices.len())
                };
                ui.label(RichText::new(text).color(MUTED));
            }

            if let Some(err) = session.last_error() {
                ui.separator();
                ui.label(RichText::new(format!("⚠ {err}")).color(Color32::from_rgb(255, 110, 110)));
            }
        });

        if let Some(status) = &self.status {
            ui.label(RichText::new(status).color(PARCHMENT).italics());
        }
        ui.add_space(2.0);
    }

    fn settings_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading(RichText::new("⚙ Price Filters").color(GOLD));
        ui.separator();

        let mut changed = false;
        {
            let mut cfg = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let prices = &mut cfg.prices;

            changed |= ui.checkbox(&mut prices.unlinked_only, "Unlinked items only").changed();
            changed |= ui.checkbox(&mut prices.ignore_fated_uniques, "Ignore fated uniques").changed();
            changed |= ui.checkbox(&mut prices.use_blacklist, "Use blacklist").changed();
            changed |= ui
                .checkbox(&mut prices.min_item_level_restriction, "Restrict by item level")
                .changed();

            ui.add_space(8.0);
            ui.label(RichText::new("Minimum mean chaos").strong());
            changed |= ui
                .add(egui::DragValue::new(&mut prices.minimum_mean_chaos_value).range(0.0..=100_000.0).speed(0.5).suffix(" c"))
                .changed();

            ui.add_space(8.0);
            ui.label(RichText::new("Sort by").strong());
            egui::ComboBox::from_id_salt("sort_by")
                .selected_text(sort_label(prices.sort_by))
                .show_ui(ui, |ui| {
                    for sort in [SortBy::Expected, SortBy::Mean] {
                        changed |= ui.selectable_value(&mut prices.sort_by, sort, sort_label(sort)).changed();
                    }
                });
        }

        ui.add_space(6.0);
        ui.label(RichText::new("Changes apply from the next sweep").small().color(MUTED));
        if ui.button("💾 Save settings").clicked() {
            self.save_config();
        }
        if changed {
            self.refresh_detail();
        }

        ui.add_space(10.0);
        ui.separator();
        ui.heading(RichText::new("🚫 Blacklist").color(GOLD));

        let fated = self.ignore.read().unwrap_or_else(PoisonError::into_inner).fated().count();
        ui.label(RichText::new(format!("{fated} fated uniques are ignored")).small().color(MUTED));

        ui.horizontal(|ui| {
            let input = ui.add(
                egui::TextEdit::singleline(&mut self.blacklist_input)
                    .hint_text("Unique name...")
                    .desired_width(170.0),
            );
            let submitted = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Add").clicked() || submitted {
                let name = std::mem::take(&mut self.blacklist_input);
                self.blacklist(&name, true);
            }
        });

        let names: Vec<String> = self
            .ignore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blacklist()
            .map(str::to_string)
            .collect();

        egui::ScrollArea::vertical().id_salt("blacklist").show(ui, |ui| {
            for name in names {
                ui.horizontal(|ui| {
                    if ui.small_button("✖").on_hover_text("Remove from blacklist").clicked() {
                        self.blacklist(&name, false);
                    }
                    ui.label(RichText::new(&name).color(PARCHMENT));
                });
            }
        });
    }

    fn results_table(&mut self, ui: &mut egui::Ui) {
        let table = self.table.clone();
        let mut clicked: Option<String> = None;

        TableBuilder::new(ui)
            .striped(true)
            .vscroll(true)
            .max_scroll_height(360.0)
            .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
            .column(Column::remainder().at_least(180.0).clip(true)) // Base
            .column(Column::exact(80.0)) // Item Level
            .column(Column::exact(60.0)) // Items
            .column(Column::exact(80.0)) // Listings
            .column(Column::exact(90.0)) // Min
            .column(Column::exact(90.0)) // Average
            .column(Column::exact(90.0)) // Max
            .column(Column::exact(120.0)) // Expected
            .header(30.0, |mut header| {
                for title in ["Base", "Item Level", "Items", "Listings", "Chaos Min", "Chaos Avg", "Chaos Max", "Expected"] {
                    header.col(|ui| {
                        ui.label(RichText::new(title).color(PARCHMENT).strong());
                    });
                }
            })
            .body(|body| {
                body.rows(30.0, table.len(), |mut row| {
                    let r = &table[row.index()];
                    let is_selected = self.selected_base.as_deref() == Some(r.base.as_str());

                    row.col(|ui| {
                        let mut text = RichText::new(&r.base);
                        if is_selected {
                            text = text.color(GOLD).strong();
                        }
                        if ui.selectable_label(is_selected, text).clicked() {
                            clicked = Some(r.base.clone());
                        }
                    });
                    row.col(|ui| {
                        let level = r.item_level.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
                        ui.label(RichText::new(level).color(MUTED));
                    });
                    row.col(|ui| {
                        ui.label(r.items.to_string());
                    });
                    row.col(|ui| {
                        ui.label(r.listings.to_string());
                    });
                    row.col(|ui| {
                        ui.label(RichText::new(format_chaos(r.chaos_min)).color(Color32::from_rgb(200, 150, 140)));
                    });
                    row.col(|ui| {
                        ui.label(format_chaos(r.chaos_mean));
                    });
                    row.col(|ui| {
                        ui.label(RichText::new(format_chaos(r.chaos_max)).color(Color32::from_rgb(150, 210, 150)));
                    });
                    row.col(|ui| {
                        ui.label(RichText::new(format!("{:.3} c", r.expected_chaos)).color(value_color(r.expected_chaos)).strong());
                    });
                });
            });

        if let Some(base) = clicked {
            self.selected_base = if self.selected_base.as_deref() == Some(base.as_str()) {
                None
            } else {
                Some(base)
            };
            self.refresh_detail();
        }
    }

    fn detail_panel(&mut self, ui: &mut egui::Ui) {
        let Some(detail) = self.detail.clone() else {
            return;
        };
        let mut toggle: Option<(String, bool)> = None;

        ui.add_space(10.0);
        egui::Frame::new()
            .fill(Color32::from_rgb(26, 22, 17))
            .stroke(Stroke::new(2.0, Color32::from_rgb(90, 72, 45)))
            .inner_margin(Margin::same(12))
            .show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.label(RichText::new("⎘ Variants of").color(GOLD).strong().size(16.0));
                    ui.label(RichText::new(&detail.base).color(UNIQUE).size(16.0));
                    ui.separator();
                    let median = detail.median_chaos.map(format_chaos).unwrap_or_else(|| "-".to_string());
                    let spread = detail.std_dev_chaos.map(format_chaos).unwrap_or_else(|| "-".to_string());
                    ui.label(
                        RichText::new(format!("{} valued | median {median} | σ {spread}", detail.valued))
                            .color(MUTED)
                            .italics(),
                    );
                });

                for v in &detail.variants {
                    ui.horizontal(|ui| {
                        let ignored = v.fated || v.blacklisted;
                        let name_color = if ignored { MUTED } else { UNIQUE };
                        ui.label(RichText::new(&v.name).color(name_color));
                        ui.label(format!("{} ({} listed)", format_chaos(v.chaos_value), v.listing_count));
                        if let Some(level) = v.level_required {
                            ui.label(RichText::new(format!("lvl {level}")).color(MUTED));
                        }
                        if v.fated {
                            ui.label(RichText::new("fated").color(Color32::from_rgb(150, 120, 200)).small());
                        }
                        if v.blacklisted {
                            ui.label(RichText::new("blacklisted").color(Color32::from_rgb(230, 110, 100)).small());
                            if ui.small_button("Unblock").clicked() {
                                toggle = Some((v.name.clone(), false));
                            }
                        } else if ui.small_button("Blacklist").clicked() {
                            toggle = Some((v.name.clone(), true));
                        }
                    });
                }

                let bars: Vec<Bar> = detail
                    .variants
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let fill = if v.fated || v.blacklisted { MUTED } else { UNIQUE };
                        Bar::new(i as f64, v.chaos_value).name(&v.name).fill(fill)
                    })
                    .collect();
                Plot::new("variant_chaos")
                    .height(160.0)
                    .allow_scroll(false)
                    .show(ui, |plot_ui| plot_ui.bar_chart(BarChart::new("Chaos value", bars)));
            });

        if let Some((name, add)) = toggle {
            self.blacklist(&name, add);
        }
    }
}

impl eframe::App for StashApp {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        self.poll_price_load();
        self.poll_session();

        egui::TopBottomPanel::top("top").show(ctx, |ui| self.top_bar(ui));

        egui::SidePanel::right("settings")
            .min_width(250.0)
            .max_width(320.0)
            .show(ctx, |ui| self.settings_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.table.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.vertical_centered(|ui| {
                        ui.add_space(80.0);
                        ui.label(RichText::new("No priced items yet").size(22.0).color(PARCHMENT));
                        ui.add_space(8.0);
                        ui.label(RichText::new("Start scanning, then hold the hotkey over your stash tab").color(MUTED));
                    });
                });
                return;
            }

            self.results_table(ui);
            self.detail_panel(ui);
        });

        let repaint = if self.loading.is_some() { LOADING_REPAINT } else { POLL_INTERVAL };
        ctx.request_repaint_after(repaint);
    }
}

fn sort_label(sort: SortBy) -> &'static str {
    match sort {
        SortBy::Expected => "Expected chaos",
        SortBy::Mean => "Mean chaos",
    }
}

fn value_color(chaos: f64) -> Color32 {
    if chaos >= 100.0 {
        Color32::from_rgb(255, 200, 80)
    } else if chaos >= 20.0 {
        Color32::from_rgb(150, 230, 150)
    } else if chaos >= 5.0 {
        Color32::from_rgb(210, 210, 170)
    } else {
        Color32::from_rgb(160, 150, 135)
    }
}

fn format_chaos(value: f64) -> String {
    if value >= 10_000.0 {
        format!("{:.1}K c", value / 1_000.0)
    } else {
        format!("{value:.1} c")
    }
}
