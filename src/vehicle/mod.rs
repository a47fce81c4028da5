//! Simulated vehicle state and the store that owns it.
//!
//! The store is the only place a [`VehicleState`] is replaced. Every write is a
//! whole-state swap under one writer lock, so readers see either the state
//! before a tool call or the state after it, never a mix.

pub mod drive_cycle;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Displayed range per percent of battery
pub const RANGE_KM_PER_PERCENT: f64 = 4.2;

// ============================================================================
// ATTRIBUTE ENUMS
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lights {
    On,
    #[default]
    Off,
    Auto,
}

impl Lights {
    pub const VALUES: &'static [&'static str] = &["on", "off", "auto"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "on" => Some(Lights::On),
            "off" => Some(Lights::Off),
            "auto" => Some(Lights::Auto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lights::On => "on",
            Lights::Off => "off",
            Lights::Auto => "auto",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Windows {
    Open,
    #[default]
    Closed,
    Vent,
}

impl Windows {
    pub const VALUES: &'static [&'static str] = &["open", "closed", "vent"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Windows::Open),
            "closed" => Some(Windows::Closed),
            "vent" => Some(Windows::Vent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Windows::Open => "open",
            Windows::Closed => "closed",
            Windows::Vent => "vent",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    #[default]
    Radio,
    Bluetooth,
    Usb,
    Off,
}

impl MediaMode {
    pub const VALUES: &'static [&'static str] = &["radio", "bluetooth", "usb", "off"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "radio" => Some(MediaMode::Radio),
            "bluetooth" => Some(MediaMode::Bluetooth),
            "usb" => Some(MediaMode::Usb),
            "off" => Some(MediaMode::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaMode::Radio => "radio",
            MediaMode::Bluetooth => "bluetooth",
            MediaMode::Usb => "usb",
            MediaMode::Off => "off",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Navigation {
    pub destination: String,
    pub distance_km: f64,
}

// ============================================================================
// VEHICLE STATE
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VehicleState {
    pub speed_kmh: f64,
    /// Always within [0, 100]
    pub battery_pct: f64,
    pub range_km: f64,
    pub lights: Lights,
    pub windows: Windows,
    pub media_mode: MediaMode,
    /// 0..=100
    pub volume: u8,
    pub navigation: Option<Navigation>,
    pub radio_station: String,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            speed_kmh: 0.0,
            battery_pct: 80.0,
            range_km: 80.0 * RANGE_KM_PER_PERCENT,
            lights: Lights::default(),
            windows: Windows::default(),
            media_mode: MediaMode::default(),
            volume: 30,
            navigation: None,
            radio_station: "FM 101.1".to_string(),
        }
    }
}

impl VehicleState {
    /// Copy with the battery clamped to [0, 100] and range recomputed from it.
    pub fn with_battery(&self, pct: f64) -> Self {
        let battery_pct = if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) };
        Self {
            battery_pct,
            range_km: battery_pct * RANGE_KM_PER_PERCENT,
            ..self.clone()
        }
    }

    /// Copy with a non-negative speed.
    pub fn with_speed(&self, speed_kmh: f64) -> Self {
        Self {
            speed_kmh: if speed_kmh.is_nan() { 0.0 } else { speed_kmh.max(0.0) },
            ..self.clone()
        }
    }

    pub fn summary(&self) -> String {
        let nav = match &self.navigation {
            Some(n) => format!("{} ({:.1} km)", n.destination, n.distance_km),
            None => "none".to_string(),
        };
        format!(
            "speed {:.0} km/h | battery {:.1}% | range {:.0} km | lights {} | windows {} | media {} vol {} | station {} | nav {}",
            self.speed_kmh,
            self.battery_pct,
            self.range_km,
            self.lights.as_str(),
            self.windows.as_str(),
            self.media_mode.as_str(),
            self.volume,
            self.radio_station,
            nav
        )
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Shared handle to the current state. Cloning the handle shares the state.
#[derive(Clone, Debug, Default)]
pub struct VehicleStore {
    inner: Arc<RwLock<VehicleState>>,
}

impl VehicleStore {
    pub fn new(state: VehicleState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VehicleState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VehicleState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> VehicleState {
        self.read().clone()
    }

    /// Compute the next state from the current one and swap it in.
    ///
    /// The write lock is held from read to swap. On `Err` nothing changes.
    pub fn update<T, E>(
        &self,
        f: impl FnOnce(&VehicleState) -> Result<(VehicleState, T), E>,
    ) -> Result<T, E> {
        let mut guard = self.write();
        let (next, out) = f(&guard)?;
        *guard = next;
        Ok(out)
    }

    /// Direct user edit of a simulated attribute (the console's `/set`-style
    /// commands). Only the physical quantities the drive cycle owns are editable
    /// here; everything else goes through tool calls.
    pub fn apply_override(&self, field: &str, value: &str) -> Result<VehicleState, ToolError> {
        let number: f64 = value
            .trim()
            .parse()
            .map_err(|_| ToolError::invalid(field, format!("'{}' is not a number", value)))?;
        if !number.is_finite() || number < 0.0 {
            return Err(ToolError::invalid(field, "value must be a non-negative number"));
        }

        self.update(|state| {
            let next = match field {
                "battery" => state.with_battery(number),
                "speed" => state.with_speed(number),
                other => {
                    return Err(ToolError::invalid(
                        other,
                        "only 'battery' and 'speed' can be overridden",
                    ))
                }
            };
            Ok((next.clone(), next))
        })
    }
}
