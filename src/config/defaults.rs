//! Default values for the session configuration document.

use serde_json::Value;

use super::session::{SessionConfig, ToolDeclaration, TurnDetection};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_AUDIO_FORMAT: &str = "pcm16";

const DEFAULT_INSTRUCTIONS: &str = "You are the voice assistant of an electric car. \
Keep answers short and conversational. Use the provided functions to operate the lights, \
windows, media system and navigation, and to read the current vehicle status before \
answering questions about speed, battery or range. After calling a function, tell the \
driver what changed in one sentence.";

// ============================================================================
// SERDE DEFAULT FUNCTIONS
// ============================================================================

pub fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

pub fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

pub fn default_audio_format() -> String {
    DEFAULT_AUDIO_FORMAT.to_string()
}

pub fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

pub fn default_turn_detection_type() -> String {
    "server_vad".to_string()
}

pub fn default_threshold() -> f64 {
    0.5
}

pub fn default_prefix_padding_ms() -> u32 {
    300
}

pub fn default_silence_duration_ms() -> u32 {
    500
}

pub fn default_turn_detection() -> TurnDetection {
    TurnDetection {
        kind: default_turn_detection_type(),
        threshold: default_threshold(),
        prefix_padding_ms: default_prefix_padding_ms(),
        silence_duration_ms: default_silence_duration_ms(),
    }
}

pub fn default_tools() -> Vec<ToolDeclaration> {
    crate::tools::declarations()
}

pub fn empty_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice: default_voice(),
            turn_detection: default_turn_detection(),
            input_audio_format: default_audio_format(),
            output_audio_format: default_audio_format(),
            instructions: default_instructions(),
            tools: default_tools(),
        }
    }
}
