//! SessionConfig document: what a single connection is opened with.
//!
//! A config value is immutable once a connection uses it. Edits produce a new
//! value through [`SessionConfig::parse`] or [`SessionConfig::with_override`],
//! and the caller decides whether to adopt it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::defaults::{
    default_audio_format, default_instructions, default_model, default_prefix_padding_ms,
    default_silence_duration_ms, default_threshold, default_tools, default_turn_detection,
    default_turn_detection_type, default_voice, empty_parameters,
};
use crate::error::ConfigError;

// ============================================================================
// DOCUMENT TYPES
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TurnDetection {
    /// Detection strategy understood by the service, e.g. "server_vad"
    #[serde(rename = "type", default = "default_turn_detection_type")]
    pub kind: String,
    /// Voice activity threshold in [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

/// A function the remote model may call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_turn_detection")]
    pub turn_detection: TurnDetection,
    #[serde(default = "default_audio_format")]
    pub input_audio_format: String,
    #[serde(default = "default_audio_format")]
    pub output_audio_format: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Ordered; names must be unique
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolDeclaration>,
}

/// Single-field edit from the settings surface.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigOverride {
    Model(String),
    Voice(String),
    Instructions(String),
    Threshold(f64),
}

impl ConfigOverride {
    /// Build an override from a field name and its raw text value.
    pub fn parse(field: &str, value: &str) -> Result<Self, ConfigError> {
        match field {
            "model" => Ok(ConfigOverride::Model(value.trim().to_string())),
            "voice" => Ok(ConfigOverride::Voice(value.trim().to_string())),
            "instructions" => Ok(ConfigOverride::Instructions(value.to_string())),
            "threshold" => value
                .trim()
                .parse::<f64>()
                .map(ConfigOverride::Threshold)
                .map_err(|e| ConfigError::Invalid(format!("threshold '{}': {}", value, e))),
            other => Err(ConfigError::Invalid(format!("unknown field '{}'", other))),
        }
    }
}

// ============================================================================
// PARSE / SERIALIZE / VALIDATE
// ============================================================================

impl SessionConfig {
    /// Parse and validate a whole configuration document.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty JSON form, accepted back by [`SessionConfig::parse`].
    pub fn to_document(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns a copy with one field replaced. `self` is left untouched on error.
    pub fn with_override(&self, edit: ConfigOverride) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        match edit {
            ConfigOverride::Model(model) => next.model = model,
            ConfigOverride::Voice(voice) => next.voice = voice,
            ConfigOverride::Instructions(text) => next.instructions = text,
            ConfigOverride::Threshold(threshold) => next.turn_detection.threshold = threshold,
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.voice.trim().is_empty() {
            return Err(ConfigError::Invalid("voice must not be empty".to_string()));
        }

        let threshold = self.turn_detection.threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "turn detection threshold {} is outside [0, 1]",
                threshold
            )));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::Invalid("tool name must not be empty".to_string()));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool declaration '{}'",
                    tool.name
                )));
            }
        }

        Ok(())
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }
}
