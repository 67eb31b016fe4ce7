//! Flowist narration window (egui/eframe application).
//!
//! # Architecture
//!
//! [`MeditationApp`] is the top-level [`eframe::App`].  It owns the
//! [`SessionController`] and renders the controller's [`SharedState`] every
//! frame; it never touches playback directly.
//!
//! | Phase | Visual |
//! |-------|--------|
//! | `Idle` | feeling input + context pickers, Start enabled |
//! | `Connecting` / `Streaming` | spinner, Start disabled, Stop enabled |
//! | `Draining` | caption of the remaining audio, Start enabled |
//! | `Finished` / `Stopped` | input form again |
//! | `Error` | last error in orange |

use std::time::Duration;

use eframe::egui;

use crate::config::AppConfig;
use crate::session::{SessionController, SessionPhase, SessionState, SharedState};
use crate::stream::SessionRequest;

/// Weather choices offered in the context picker.
pub const WEATHER_CHOICES: &[&str] = &["Sunny", "Cloudy", "Light rain", "Heavy rain", "Snow", "Haze"];

/// Location choices offered in the context picker.
pub const LOCATION_CHOICES: &[&str] = &["Home", "Office", "Outdoors", "Café", "Other"];

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// Build a session request from the form, stamping the current local time.
///
/// ```
/// use flowist_player::app::build_request;
///
/// assert!(build_request("demo", "   ", "Sunny", "Home").is_err());
/// let request = build_request("demo", " tense shoulders ", "Sunny", "Home").unwrap();
/// assert_eq!(request.user_feeling_input, "tense shoulders");
/// ```
pub fn build_request(
    user_id: &str,
    feeling: &str,
    weather: &str,
    location: &str,
) -> Result<SessionRequest, &'static str> {
    let feeling = feeling.trim();
    if feeling.is_empty() {
        return Err("Describe how you feel first");
    }
    Ok(SessionRequest::now(user_id, feeling, weather, location))
}

// ---------------------------------------------------------------------------
// MeditationApp
// ---------------------------------------------------------------------------

pub struct MeditationApp {
    controller: SessionController,
    state: SharedState,

    // ── Form ─────────────────────────────────────────────────────────────
    feeling: String,
    weather: String,
    location: String,

    /// Rejection from the form or from `start`, shown until the next attempt.
    form_error: Option<String>,

    spinner_phase: f32,
    config: AppConfig,
}

impl MeditationApp {
    pub fn new(controller: SessionController, config: AppConfig) -> Self {
        let state = controller.state();
        Self {
            controller,
            state,
            feeling: String::new(),
            weather: config.user.weather.clone(),
            location: config.user.location.clone(),
            form_error: None,
            spinner_phase: 0.0,
            config,
        }
    }

    fn snapshot(&self) -> SessionState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn start_session(&mut self) {
        let request = match build_request(
            &self.config.user.user_id,
            &self.feeling,
            &self.weather,
            &self.location,
        ) {
            Ok(request) => request,
            Err(message) => {
                self.form_error = Some(message.to_string());
                return;
            }
        };

        self.form_error = match self.controller.start(request) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("app: start failed: {e}");
                Some(e.to_string())
            }
        };
    }

    fn stop_session(&mut self) {
        self.controller.stop();
        self.feeling.clear();
        self.form_error = None;
    }

    // ── Panels ───────────────────────────────────────────────────────────

    fn draw_form(&mut self, ui: &mut egui::Ui, locked: bool) {
        ui.label(
            egui::RichText::new("How are you feeling right now?")
                .color(egui::Color32::from_rgb(200, 200, 200))
                .size(13.0),
        );
        ui.add_enabled(
            !locked,
            egui::TextEdit::multiline(&mut self.feeling)
                .hint_text("Stressful day, tight shoulders, racing thoughts...")
                .desired_rows(3)
                .desired_width(f32::INFINITY),
        );

        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.label(
                egui::RichText::new(chrono::Local::now().format("%H:%M").to_string())
                    .color(egui::Color32::from_rgb(140, 140, 140))
                    .size(12.0),
            );
            ui.add_enabled_ui(!locked, |ui| {
                picker(ui, "weather", &mut self.weather, WEATHER_CHOICES);
                picker(ui, "location", &mut self.location, LOCATION_CHOICES);
            });
        });
    }

    fn draw_controls(&mut self, ui: &mut egui::Ui, state: &SessionState) {
        ui.horizontal(|ui| {
            let start = ui.add_enabled(
                !state.in_flight,
                egui::Button::new(egui::RichText::new("Begin meditation").size(13.0)),
            );
            if start.clicked() {
                self.start_session();
            }

            let live = state.in_flight || state.phase == SessionPhase::Draining;
            let stop = ui.add_enabled(live, egui::Button::new(egui::RichText::new("Stop").size(13.0)));
            if stop.clicked() {
                self.stop_session();
            }
        });
    }

    fn draw_caption(&self, ui: &mut egui::Ui, state: &SessionState) {
        let (rect, _) = ui.allocate_exact_size(
            egui::vec2(ui.available_width(), self.config.ui.caption_size * 3.0),
            egui::Sense::hover(),
        );
        ui.painter().text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            state.current_caption.as_str(),
            egui::FontId::proportional(self.config.ui.caption_size),
            egui::Color32::from_rgb(230, 230, 210),
        );
    }

    fn draw_status(&self, ui: &mut egui::Ui, state: &SessionState) {
        let mut status = state.phase.label().to_string();
        if state.phase.is_busy() {
            status = format!("{} {status}", self.spinner_char());
        }
        if let Some(id) = &state.session_id {
            status.push_str(&format!("  ·  session {id}"));
        }

        ui.horizontal(|ui| {
            ui.label(
                egui::RichText::new(status)
                    .color(phase_color(state.phase))
                    .size(11.0),
            );
        });

        if let Some(error) = self.form_error.as_ref().or(state.last_error.as_ref()) {
            ui.label(
                egui::RichText::new(error.as_str())
                    .color(egui::Color32::from_rgb(255, 136, 68))
                    .size(11.0),
            );
        }
    }

    fn spinner_char(&self) -> char {
        let chars = ['|', '/', '-', '\\'];
        chars[(self.spinner_phase as usize) % chars.len()]
    }
}

fn picker(ui: &mut egui::Ui, id: &str, selected: &mut String, choices: &[&str]) {
    egui::ComboBox::from_id_salt(id)
        .selected_text(selected.as_str())
        .show_ui(ui, |ui| {
            for choice in choices {
                ui.selectable_value(selected, choice.to_string(), *choice);
            }
        });
}

fn phase_color(phase: SessionPhase) -> egui::Color32 {
    match phase {
        SessionPhase::Idle | SessionPhase::Finished | SessionPhase::Stopped => {
            egui::Color32::from_rgb(120, 120, 120)
        }
        SessionPhase::Connecting | SessionPhase::Streaming => egui::Color32::from_rgb(68, 136, 255),
        SessionPhase::Draining => egui::Color32::from_rgb(80, 200, 120),
        SessionPhase::Error => egui::Color32::from_rgb(255, 136, 68),
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for MeditationApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let state = self.snapshot();

        self.spinner_phase += 0.08;
        if self.spinner_phase >= 4.0 {
            self.spinner_phase = 0.0;
        }

        // Captions change from the playback side; keep polling while live.
        if state.in_flight || state.is_playing || state.phase == SessionPhase::Draining {
            ctx.request_repaint_after(Duration::from_millis(50));
        }

        let frame = egui::Frame::new()
            .fill(egui::Color32::from_rgb(30, 30, 34))
            .corner_radius(egui::CornerRadius::same(8))
            .inner_margin(egui::Margin::same(12));

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            self.draw_form(ui, state.in_flight);
            ui.add_space(6.0);
            self.draw_controls(ui, &state);
            ui.separator();
            self.draw_caption(ui, &state);
            ui.separator();
            self.draw_status(ui, &state);
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("app: window closing, tearing down playback");
        self.controller.cleanup();
    }
}
