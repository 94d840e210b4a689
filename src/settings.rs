//! Capture device/channel settings
//!
//! One process-wide value. Changing it is what triggers a capture restart;
//! the store itself only validates, holds and persists it.

use parking_lot::RwLock;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::constants::CAPTURE_CHANNEL_COUNT;
use crate::error::SettingsError;

/// Current capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub device: u32,
    pub mode: u32,
    pub left_channel: u32,
    pub right_channel: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: 0,
            mode: 11,
            left_channel: 0,
            right_channel: 1,
        }
    }
}

impl Settings {
    /// `-d <device> -m <mode> -c <count> -L <left> -R <right>`
    pub fn capture_args(&self, channel_count: u32) -> Vec<String> {
        vec![
            "-d".into(),
            self.device.to_string(),
            "-m".into(),
            self.mode.to_string(),
            "-c".into(),
            channel_count.to_string(),
            "-L".into(),
            self.left_channel.to_string(),
            "-R".into(),
            self.right_channel.to_string(),
        ]
    }

    /// `{type: "settings", ...}` pushed to dashboards
    pub fn to_message(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("type".into(), Value::String("settings".into()));
        }
        value.to_string()
    }

    fn validate(&self, channel_count: u32) -> Result<(), SettingsError> {
        for channel in [self.left_channel, self.right_channel] {
            if channel >= channel_count {
                return Err(SettingsError::ChannelOutOfRange {
                    channel,
                    count: channel_count,
                });
            }
        }
        Ok(())
    }
}

/// Settings as served by `GET /api/settings`. The channel panel reads the
/// `*AudioChannel` names, everything else reads the camelCase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    #[serde(flatten)]
    pub settings: Settings,
    pub left_audio_channel: u32,
    pub right_audio_channel: u32,
}

impl From<Settings> for SettingsView {
    fn from(settings: Settings) -> Self {
        Self {
            left_audio_channel: settings.left_channel,
            right_audio_channel: settings.right_channel,
            settings,
        }
    }
}

/// Partial update posted by dashboards.
///
/// Fields accept numbers or numeric strings since `<select>` values arrive
/// as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub device: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub mode: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", alias = "leftAudioChannel")]
    pub left_channel: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", alias = "rightAudioChannel")]
    pub right_channel: Option<u32>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply_to(&self, settings: &Settings) -> Settings {
        Settings {
            device: self.device.unwrap_or(settings.device),
            mode: self.mode.unwrap_or(settings.mode),
            left_channel: self.left_channel.unwrap_or(settings.left_channel),
            right_channel: self.right_channel.unwrap_or(settings.right_channel),
        }
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => u32::try_from(n).map(Some).map_err(de::Error::custom),
        Some(Raw::Text(text)) => text
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("not a number: {text:?}"))),
    }
}

/// Holder of the singleton [`Settings`]
pub struct SettingsStore {
    current: RwLock<Settings>,
    path: Option<PathBuf>,
    channel_count: u32,
    persist_lock: tokio::sync::Mutex<()>,
}

impl SettingsStore {
    /// In-memory store, nothing persisted
    pub fn new(initial: Settings, channel_count: u32) -> Self {
        Self {
            current: RwLock::new(initial),
            path: None,
            channel_count,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Store backed by a TOML file, restoring the last-known value if present
    pub fn open(path: impl Into<PathBuf>, channel_count: u32) -> Self {
        let path = path.into();
        let initial = match Self::read(&path) {
            Ok(Some(settings)) if settings.validate(channel_count).is_ok() => {
                tracing::info!(path = %path.display(), ?settings, "Restored capture settings");
                settings
            }
            Ok(Some(settings)) => {
                tracing::warn!(?settings, "Persisted settings out of range, using defaults");
                Settings::default()
            }
            Ok(None) => Settings::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring settings file: {}", e);
                Settings::default()
            }
        };

        Self {
            current: RwLock::new(initial),
            path: Some(path),
            channel_count,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Argument vector for the capture process, rendered from the current value
    pub fn capture_args(&self) -> Vec<String> {
        self.current.read().capture_args(self.channel_count)
    }

    /// Validate and merge a patch. Persistence failures are logged, not fatal.
    pub async fn update(&self, patch: &SettingsPatch) -> Result<Settings, SettingsError> {
        let updated = {
            let mut current = self.current.write();
            let candidate = patch.apply_to(&current);
            candidate.validate(self.channel_count)?;
            *current = candidate.clone();
            candidate
        };

        if let Some(path) = &self.path {
            if let Err(e) = self.persist(path.clone()).await {
                tracing::warn!(path = %path.display(), "{}", e);
            }
        }

        tracing::info!(settings = ?updated, "Capture settings updated");
        Ok(updated)
    }

    /// Write the latest value on the blocking pool. Writers queue on
    /// `persist_lock` so the file always ends at the newest value.
    async fn persist(&self, path: PathBuf) -> Result<(), SettingsError> {
        let _guard = self.persist_lock.lock().await;
        let latest = self.get();
        tokio::task::spawn_blocking(move || Self::write(&path, &latest))
            .await
            .map_err(|e| SettingsError::Persist(e.to_string()))?
    }

    fn read(path: &Path) -> Result<Option<Settings>, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SettingsError::Parse(e.to_string())),
        };
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| SettingsError::Parse(e.to_string()))
    }

    fn write(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Persist(e.to_string()))?;
        }
        let text = toml::to_string(settings).map_err(|e| SettingsError::Persist(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| SettingsError::Persist(e.to_string()))
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default(), CAPTURE_CHANNEL_COUNT)
    }
}
