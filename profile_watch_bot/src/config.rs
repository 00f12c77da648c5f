use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use teloxide::types::ChatId;

/// Everything that can be set in `config.json`. Anything left out gets its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chats where messages get deleted. Everywhere else, the bot only watches names.
    pub moderated_chats: Vec<i64>,
    /// Messages with any of these words get deleted right away.
    pub banned_words: Vec<String>,
    /// Messages with any of these words or phrases get deleted after `delete_delay_secs`.
    pub delay_keywords: Vec<String>,
    pub delete_delay_secs: u64,
    pub profiles_path: String,
    pub scheduled_deletions_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            moderated_chats: Vec::new(),
            banned_words: Vec::new(),
            delay_keywords: vec!["#report".to_string(), "report".to_string()],
            // A day.
            delete_delay_secs: 24 * 60 * 60,
            profiles_path: "profiles.json".to_string(),
            scheduled_deletions_path: "scheduled_deletions.json".to_string(),
        }
    }
}

impl Config {
    /// Load the config from a JSON file. A missing file means defaults, and so
    /// does a broken one, with a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No {} found, using default config.", path.display());
                return Config::default();
            }
            Err(e) => {
                log::warn!("Failed to read {}, using default config: {e}", path.display());
                return Config::default();
            }
        };

        match Self::from_json(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Malformed {}, using default config: {e}", path.display());
                Config::default()
            }
        }
    }

    /// # Errors
    ///
    /// Errors if the text is not a valid config.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[must_use]
    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_secs)
    }

    pub fn moderated_chat_ids(&self) -> impl Iterator<Item = ChatId> + '_ {
        self.moderated_chats.iter().copied().map(ChatId)
    }
}
