//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every struct is `#[serde(default)]`: keys missing from `settings.toml`
//! take their default value.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the narration backend lives and how patiently we talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend.  Relative audio references are resolved
    /// against it.
    pub base_url: String,
    /// Path of the synchronized audio/text event stream endpoint.
    pub stream_path: String,
    /// Seconds allowed for establishing a TCP/TLS connection.
    ///
    /// Stream reads themselves have no timeout: an idle producer keeps the
    /// session open until the connection closes.
    pub connect_timeout_secs: u64,
    /// Maximum seconds for retrieving one audio payload.
    pub audio_timeout_secs: u64,
}

impl ServerConfig {
    /// Full URL of the event stream endpoint.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            stream_path: "/api/v1/meditation/session/audio-text-stream".into(),
            connect_timeout_secs: 10,
            audio_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Settings for the playback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Linear output gain (0.0 – 1.0).
    pub volume: f32,
    /// Upper bound on remembered `(seq, kind)` keys per session.  The oldest
    /// keys are forgotten first once the bound is reached.
    pub max_tracked_events: usize,
    /// Capacity of the channel between the stream reader and the session.
    pub event_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            max_tracked_events: 10_000,
            event_buffer: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// UserConfig
// ---------------------------------------------------------------------------

/// Identity and default context sent with every session request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Backend user identifier (memory and history are keyed on it).
    pub user_id: String,
    /// Pre-selected weather in the request form.
    pub weather: String,
    /// Pre-selected location in the request form.
    pub location: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_id: "demo_user_001".into(),
            weather: "Sunny".into(),
            location: "Home".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui window appearance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Last saved window position `(x, y)` in screen pixels.
    pub window_position: Option<(f32, f32)>,
    /// Keep the window floating above all other windows.
    pub always_on_top: bool,
    /// Point size of the caption text.
    pub caption_size: f32,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: false,
            caption_size: 22.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use flowist_player::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// println!("{}", config.server.stream_url());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend endpoints and timeouts.
    pub server: ServerConfig,
    /// Playback engine settings.
    pub playback: PlaybackConfig,
    /// Request identity and context defaults.
    pub user: UserConfig,
    /// Window settings.
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.server.base_url, default.server.base_url);
        assert_eq!(config.user.user_id, default.user.user_id);
        assert_eq!(
            config.playback.max_tracked_events,
            default.playback.max_tracked_events
        );
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.base_url, "http://localhost:8000");
        assert_eq!(cfg.server.connect_timeout_secs, 10);
        assert_eq!(cfg.server.audio_timeout_secs, 30);
        assert!((cfg.playback.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(cfg.playback.max_tracked_events, 10_000);
        assert_eq!(cfg.user.user_id, "demo_user_001");
        assert!(cfg.ui.window_position.is_none());
    }

    #[test]
    fn stream_url_joins_without_double_slash() {
        let mut server = ServerConfig::default();
        assert_eq!(
            server.stream_url(),
            "http://localhost:8000/api/v1/meditation/session/audio-text-stream"
        );

        server.base_url = "https://flowist.example/".into();
        server.stream_path = "stream".into();
        assert_eq!(server.stream_url(), "https://flowist.example/stream");
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("settings.toml");

        let mut cfg = AppConfig::default();
        cfg.server.base_url = "https://flowist.example".into();
        cfg.server.audio_timeout_secs = 5;
        cfg.playback.volume = 0.4;
        cfg.user.user_id = "u-42".into();
        cfg.user.weather = "Raining".into();
        cfg.ui.window_position = Some((100.0, 200.0));

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.server.base_url, "https://flowist.example");
        assert_eq!(loaded.server.audio_timeout_secs, 5);
        assert!((loaded.playback.volume - 0.4).abs() < 1e-6);
        assert_eq!(loaded.user.user_id, "u-42");
        assert_eq!(loaded.user.weather, "Raining");
        assert_eq!(loaded.ui.window_position, Some((100.0, 200.0)));
    }

    #[test]
    fn partial_file_fills_missing_keys_with_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[server]\nbase_url = \"https://flowist.example\"\n\n[playback]\nvolume = 0.5\n",
        )
        .expect("write");

        let loaded = AppConfig::load_from(&path).expect("load");
        let default = AppConfig::default();

        assert_eq!(loaded.server.base_url, "https://flowist.example");
        assert_eq!(loaded.server.stream_path, default.server.stream_path);
        assert_eq!(loaded.server.connect_timeout_secs, 10);
        assert!((loaded.playback.volume - 0.5).abs() < 1e-6);
        assert_eq!(loaded.playback.event_buffer, default.playback.event_buffer);
        assert_eq!(loaded.user.user_id, default.user.user_id);
        assert!((loaded.ui.caption_size - default.ui.caption_size).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "server = 12").expect("write");

        assert!(AppConfig::load_from(&path).is_err());
    }
}
