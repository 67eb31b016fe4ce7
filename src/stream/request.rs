//! Session request body sent to the narration backend.

use serde::{Deserialize, Serialize};

/// Environment the user is meditating in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentContext {
    /// Local wall-clock time, `HH:MM`.
    pub local_time: String,
    pub weather: String,
    pub location: String,
}

/// Body of the stream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub user_id: String,
    pub user_feeling_input: String,
    pub current_context: CurrentContext,
}

impl SessionRequest {
    /// Build a request stamped with the current local time.
    pub fn now(
        user_id: impl Into<String>,
        feeling: impl Into<String>,
        weather: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_feeling_input: feeling.into(),
            current_context: CurrentContext {
                local_time: chrono::Local::now().format("%H:%M").to_string(),
                weather: weather.into(),
                location: location.into(),
            },
        }
    }
}
