//! Function declarations advertised to the remote model at session start.

use serde_json::json;

use crate::config::ToolDeclaration;
use crate::error::ConfigError;
use crate::vehicle::{Lights, MediaMode, Windows};

pub const SET_LIGHTS: &str = "setLights";
pub const SET_WINDOWS: &str = "setWindows";
pub const SET_MEDIA_MODE: &str = "setMediaMode";
pub const SET_VOLUME: &str = "setVolume";
pub const SET_RADIO_STATION: &str = "setRadioStation";
pub const START_NAVIGATION: &str = "startNavigation";
pub const STOP_NAVIGATION: &str = "stopNavigation";
pub const GET_VEHICLE_STATUS: &str = "getVehicleStatus";

/// Every tool the dispatcher understands, in declaration order
pub const KNOWN_TOOLS: &[&str] = &[
    SET_LIGHTS,
    SET_WINDOWS,
    SET_MEDIA_MODE,
    SET_VOLUME,
    SET_RADIO_STATION,
    START_NAVIGATION,
    STOP_NAVIGATION,
    GET_VEHICLE_STATUS,
];

lazy_static::lazy_static! {
    static ref TOOL_DECLARATIONS: Vec<ToolDeclaration> = vec![
        ToolDeclaration {
            name: SET_LIGHTS.to_string(),
            description: "Switch the headlights on, off or to automatic.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "state": { "type": "string", "enum": Lights::VALUES }
                },
                "required": ["state"]
            }),
        },
        ToolDeclaration {
            name: SET_WINDOWS.to_string(),
            description: "Open, close or vent all windows.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "position": { "type": "string", "enum": Windows::VALUES }
                },
                "required": ["position"]
            }),
        },
        ToolDeclaration {
            name: SET_MEDIA_MODE.to_string(),
            description: "Select the media source.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "mode": { "type": "string", "enum": MediaMode::VALUES }
                },
                "required": ["mode"]
            }),
        },
        ToolDeclaration {
            name: SET_VOLUME.to_string(),
            description: "Set the media volume from 0 (mute) to 100.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "level": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "required": ["level"]
            }),
        },
        ToolDeclaration {
            name: SET_RADIO_STATION.to_string(),
            description: "Tune the radio to a station and switch the media source to radio."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "station": { "type": "string", "description": "Station name or frequency, e.g. \"FM 98.5\"" }
                },
                "required": ["station"]
            }),
        },
        ToolDeclaration {
            name: START_NAVIGATION.to_string(),
            description: "Start route guidance to a destination.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "destination": { "type": "string" },
                    "distanceKm": { "type": "number", "minimum": 0 }
                },
                "required": ["destination", "distanceKm"]
            }),
        },
        ToolDeclaration {
            name: STOP_NAVIGATION.to_string(),
            description: "Cancel the active route guidance.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolDeclaration {
            name: GET_VEHICLE_STATUS.to_string(),
            description: "Read speed, battery, range and the state of lights, windows, media and navigation."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ];
}

pub fn declarations() -> Vec<ToolDeclaration> {
    TOOL_DECLARATIONS.clone()
}

/// Check a declared tool list against the dispatcher table. Every known tool
/// must be declared once with the schema the dispatcher validates against;
/// only descriptions may differ.
pub fn check_declared(declared: &[ToolDeclaration]) -> Result<(), ConfigError> {
    for decl in declared {
        let Some(known) = TOOL_DECLARATIONS.iter().find(|d| d.name == decl.name) else {
            return Err(ConfigError::Invalid(format!(
                "declared tool '{}' has no handler",
                decl.name
            )));
        };
        if decl.parameters != known.parameters {
            return Err(ConfigError::Invalid(format!(
                "parameters of '{}' differ from what the dispatcher accepts",
                decl.name
            )));
        }
    }

    let missing: Vec<&str> = KNOWN_TOOLS
        .iter()
        .copied()
        .filter(|name| !declared.iter().any(|d| d.name == *name))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "tools not declared: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}
