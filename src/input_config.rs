//! Device-configuration helper
//!
//! The helper is an external binary. It is run with arguments and its stdout
//! is parsed line by line:
//!
//! ```text
//! $ InputConfig --list
//! 0: DeckLink Duo 2 (1)
//! 1: DeckLink Duo 2 (2)
//!
//! $ InputConfig --device 0 --list-inputs
//! Video inputs:
//!   1: SDI *
//!   2: HDMI
//! Audio inputs:
//!   1: Embedded (current)
//!   2: AES/EBU
//! ```

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::InputConfigSettings;
use crate::error::InputConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputOption {
    pub id: String,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputOptions {
    pub video_inputs: Vec<InputOption>,
    pub audio_inputs: Vec<InputOption>,
}

/// Body of `POST /api/input-config/apply`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    #[serde(deserialize_with = "required_id")]
    pub device: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub video_input_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub audio_input_id: Option<String>,
}

fn id_from_value<E: de::Error>(value: Value) -> Result<Option<String>, E> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(E::custom(format!("expected an id, got {other}"))),
    }
}

fn required_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    id_from_value(Value::deserialize(deserializer)?)?.ok_or_else(|| de::Error::custom("device is required"))
}

fn optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    id_from_value(Value::deserialize(deserializer)?)
}

/// Parse `--list` output
pub fn parse_devices(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter_map(|(id, name)| {
            let id = id.trim();
            (!id.is_empty()).then(|| Device {
                id: id.to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Parse `--list-inputs` output
pub fn parse_options(stdout: &str) -> InputOptions {
    #[derive(Clone, Copy)]
    enum Section {
        None,
        Video,
        Audio,
    }

    let mut options = InputOptions::default();
    let mut section = Section::None;

    for line in stdout.lines().map(str::trim) {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("video inputs") {
            section = Section::Video;
            continue;
        }
        if lower.starts_with("audio inputs") {
            section = Section::Audio;
            continue;
        }

        let Some((id, label)) = line.split_once(':') else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let (label, selected) = strip_selection_marker(label.trim());
        let option = InputOption {
            id: id.to_string(),
            label: label.to_string(),
            selected,
        };

        match section {
            Section::Video => options.video_inputs.push(option),
            Section::Audio => options.audio_inputs.push(option),
            Section::None => {}
        }
    }
    options
}

fn strip_selection_marker(label: &str) -> (&str, bool) {
    if let Some(rest) = label.strip_suffix('*') {
        (rest.trim_end(), true)
    } else if let Some(rest) = label.strip_suffix("(current)") {
        (rest.trim_end(), true)
    } else {
        (label, false)
    }
}

/// Ids end up on the helper's command line
fn validate_id(id: &str) -> Result<&str, InputConfigError> {
    let valid = !id.is_empty()
        && !id.starts_with('-')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(id)
    } else {
        Err(InputConfigError::InvalidArgument(id.to_string()))
    }
}

/// Runs the helper binary
#[derive(Debug, Clone)]
pub struct InputConfigProxy {
    binary: PathBuf,
    timeout: Duration,
}

impl InputConfigProxy {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &InputConfigSettings) -> Self {
        Self::new(settings.binary.clone(), settings.timeout())
    }

    pub async fn devices(&self) -> Result<Vec<Device>, InputConfigError> {
        let stdout = self.run(&["--list"]).await?;
        Ok(parse_devices(&stdout))
    }

    pub async fn options(&self, device: &str) -> Result<InputOptions, InputConfigError> {
        let device = validate_id(device.trim())?;
        let stdout = self.run(&["--device", device, "--list-inputs"]).await?;
        Ok(parse_options(&stdout))
    }

    /// Apply an input selection. Success is a zero exit status.
    pub async fn apply(&self, request: &ApplyRequest) -> Result<(), InputConfigError> {
        let mut args = vec!["--device", validate_id(&request.device)?];
        if let Some(video) = &request.video_input_id {
            args.extend(["--video-input", validate_id(video)?]);
        }
        if let Some(audio) = &request.audio_input_id {
            args.extend(["--audio-input", validate_id(audio)?]);
        }
        self.run(&args).await?;
        tracing::info!(device = %request.device, video = ?request.video_input_id, audio = ?request.audio_input_id, "Input configuration applied");
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<String, InputConfigError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary.display(), ?args, "Running input config helper");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| InputConfigError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| InputConfigError::SpawnFailed(format!("{}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            return Err(InputConfigError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
