//! Tool dispatcher: maps a model-issued function call onto the vehicle state.
//!
//! [`execute`] is the pure mapping `(name, args, state) -> (next state, payload)`.
//! [`dispatch`] wraps it for the session controller: it never fails, turning
//! every [`ToolError`] into an error payload the remote model can read back.

mod declarations;

use serde::Serialize;
use serde_json::{json, Map, Value};

pub use declarations::{check_declared, declarations, KNOWN_TOOLS};
use declarations::{
    GET_VEHICLE_STATUS, SET_LIGHTS, SET_MEDIA_MODE, SET_RADIO_STATION, SET_VOLUME, SET_WINDOWS,
    START_NAVIGATION, STOP_NAVIGATION,
};

use crate::error::ToolError;
use crate::vehicle::{Lights, MediaMode, Navigation, VehicleState, VehicleStore, Windows};

pub type ToolArgs = Map<String, Value>;

/// A completed function call from the remote model. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: ToolArgs,
}

/// What goes back over the channel for a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub success: bool,
    pub payload: Value,
}

impl ToolCallResult {
    pub fn failed(call_id: &str, err: &ToolError) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            payload: error_payload(err),
        }
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Parse the JSON-encoded `arguments` string of a call. An empty string is an
/// empty argument object.
pub fn parse_arguments(raw: &str) -> Result<ToolArgs, ToolError> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::ArgumentParse(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(ToolError::ArgumentParse(e.to_string())),
    }
}

fn required<'a>(tool: &str, args: &'a ToolArgs, key: &str) -> Result<&'a Value, ToolError> {
    args.get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ToolError::invalid(tool, format!("missing '{}'", key)))
}

fn required_str<'a>(tool: &str, args: &'a ToolArgs, key: &str) -> Result<&'a str, ToolError> {
    let value = required(tool, args, key)?
        .as_str()
        .ok_or_else(|| ToolError::invalid(tool, format!("'{}' must be a string", key)))?;
    if value.trim().is_empty() {
        return Err(ToolError::invalid(tool, format!("'{}' must not be empty", key)));
    }
    Ok(value.trim())
}

fn required_choice<T>(
    tool: &str,
    args: &ToolArgs,
    key: &str,
    parse: fn(&str) -> Option<T>,
    allowed: &[&str],
) -> Result<T, ToolError> {
    let raw = required_str(tool, args, key)?;
    parse(&raw.to_lowercase()).ok_or_else(|| {
        ToolError::invalid(
            tool,
            format!("'{}' must be one of {}, got '{}'", key, allowed.join(", "), raw),
        )
    })
}

fn required_number(tool: &str, args: &ToolArgs, key: &str) -> Result<f64, ToolError> {
    required(tool, args, key)?
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ToolError::invalid(tool, format!("'{}' must be a number", key)))
}

// ============================================================================
// EXECUTION
// ============================================================================

fn changed(field: &str, value: impl Into<Value>) -> Value {
    json!({ "status": "ok", "field": field, "value": value.into() })
}

/// Run one tool against `state`.
///
/// On error `state` is untouched and no next state is produced.
pub fn execute(
    name: &str,
    args: &ToolArgs,
    state: &VehicleState,
) -> Result<(VehicleState, Value), ToolError> {
    let mut next = state.clone();

    let payload = match name {
        SET_LIGHTS => {
            let lights = required_choice(name, args, "state", Lights::parse, Lights::VALUES)?;
            next.lights = lights;
            changed("lights", lights.as_str())
        }
        SET_WINDOWS => {
            let windows = required_choice(name, args, "position", Windows::parse, Windows::VALUES)?;
            next.windows = windows;
            changed("windows", windows.as_str())
        }
        SET_MEDIA_MODE => {
            let mode = required_choice(name, args, "mode", MediaMode::parse, MediaMode::VALUES)?;
            next.media_mode = mode;
            changed("media_mode", mode.as_str())
        }
        SET_VOLUME => {
            let level = required_number(name, args, "level")?;
            if level.fract() != 0.0 || !(0.0..=100.0).contains(&level) {
                return Err(ToolError::invalid(
                    name,
                    format!("'level' must be a whole number from 0 to 100, got {}", level),
                ));
            }
            next.volume = level as u8;
            changed("volume", next.volume)
        }
        SET_RADIO_STATION => {
            let station = required_str(name, args, "station")?;
            next.radio_station = station.to_string();
            next.media_mode = MediaMode::Radio;
            json!({
                "status": "ok",
                "fields": {
                    "radio_station": station,
                    "media_mode": MediaMode::Radio.as_str()
                }
            })
        }
        START_NAVIGATION => {
            let destination = required_str(name, args, "destination")?;
            let distance_km = required_number(name, args, "distanceKm")?;
            if distance_km < 0.0 {
                return Err(ToolError::invalid(name, "'distanceKm' must not be negative"));
            }
            next.navigation = Some(Navigation {
                destination: destination.to_string(),
                distance_km,
            });
            changed(
                "navigation",
                json!({ "destination": destination, "distance_km": distance_km }),
            )
        }
        STOP_NAVIGATION => {
            next.navigation = None;
            changed("navigation", Value::Null)
        }
        GET_VEHICLE_STATUS => json!({
            "status": "ok",
            "state": serde_json::to_value(state).unwrap_or(Value::Null)
        }),
        other => return Err(ToolError::UnknownTool(other.to_string())),
    };

    Ok((next, payload))
}

pub fn error_payload(err: &ToolError) -> Value {
    json!({
        "status": "error",
        "error": err.kind(),
        "message": err.to_string()
    })
}

/// Run a parsed call against the shared store and build its result.
///
/// Exactly one whole-state swap happens per successful call; failed calls
/// leave the store as it was.
pub fn dispatch(store: &VehicleStore, request: &ToolCallRequest) -> ToolCallResult {
    let outcome = store.update(|state| execute(&request.name, &request.arguments, state));

    match outcome {
        Ok(payload) => {
            tracing::info!("[Tools] {} ok ({})", request.name, request.call_id);
            ToolCallResult {
                call_id: request.call_id.clone(),
                success: true,
                payload,
            }
        }
        Err(err) => {
            tracing::warn!("[Tools] {} failed ({}): {}", request.name, request.call_id, err);
            ToolCallResult::failed(&request.call_id, &err)
        }
    }
}
