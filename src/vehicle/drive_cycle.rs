//! Drive-cycle simulation of vehicle speed and battery drain.
//!
//! The profile and the consumption curve sit behind [`DriveCycle`]. The
//! simulator only reduces wall-clock time into the cycle, applies the curve on
//! a steady cadence and clamps the result.

use std::time::{Duration, Instant};

use super::{VehicleState, VehicleStore};

pub trait DriveCycle: Send {
    /// Cycle length in seconds
    fn duration_secs(&self) -> f64;

    /// Target speed in km/h at a position inside the cycle
    fn speed_at(&self, position_secs: f64) -> f64;

    /// Battery percent consumed during one tick at `speed_kmh`
    fn consumption_for(&self, speed_kmh: f64) -> f64;
}

/// ECE-15 urban segment: (time s, speed km/h) breakpoints, linearly interpolated.
const URBAN_PROFILE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (11.0, 0.0),
    (15.0, 15.0),
    (23.0, 15.0),
    (28.0, 0.0),
    (49.0, 0.0),
    (61.0, 32.0),
    (85.0, 32.0),
    (96.0, 0.0),
    (117.0, 0.0),
    (143.0, 50.0),
    (155.0, 50.0),
    (163.0, 35.0),
    (176.0, 35.0),
    (188.0, 0.0),
    (195.0, 0.0),
];

const IDLE_DRAW_PCT: f64 = 0.002;
const DRAW_PCT_PER_KMH: f64 = 0.0004;

#[derive(Debug, Clone, Copy, Default)]
pub struct UrbanCycle;

impl DriveCycle for UrbanCycle {
    fn duration_secs(&self) -> f64 {
        URBAN_PROFILE[URBAN_PROFILE.len() - 1].0
    }

    fn speed_at(&self, position_secs: f64) -> f64 {
        for pair in URBAN_PROFILE.windows(2) {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            if position_secs >= t0 && position_secs <= t1 {
                let span = t1 - t0;
                if span <= 0.0 {
                    return v1;
                }
                return v0 + (v1 - v0) * (position_secs - t0) / span;
            }
        }
        0.0
    }

    fn consumption_for(&self, speed_kmh: f64) -> f64 {
        IDLE_DRAW_PCT + speed_kmh.max(0.0) * DRAW_PCT_PER_KMH
    }
}

pub struct DriveSimulator {
    cycle: Box<dyn DriveCycle>,
    tick_interval: Duration,
    last_tick: Option<Instant>,
}

impl DriveSimulator {
    pub fn new(cycle: Box<dyn DriveCycle>, tick_interval: Duration) -> Self {
        Self {
            cycle,
            tick_interval,
            last_tick: None,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Next state for a given wall-clock time (seconds since the epoch).
    pub fn step(&self, wall_clock_secs: f64, state: &VehicleState) -> VehicleState {
        let duration = self.cycle.duration_secs();
        let position = if duration > 0.0 {
            wall_clock_secs.rem_euclid(duration)
        } else {
            0.0
        };

        let speed = self.cycle.speed_at(position).max(0.0);
        let drained = state.battery_pct - self.cycle.consumption_for(speed);

        let mut next = state.with_speed(speed).with_battery(drained);
        if let Some(nav) = next.navigation.as_mut() {
            let travelled = speed * self.tick_interval.as_secs_f64() / 3600.0;
            nav.distance_km = (nav.distance_km - travelled).max(0.0);
        }
        next
    }

    /// Apply one tick if the interval has elapsed since the previous one.
    /// Returns true when a tick was applied.
    pub fn poll(&mut self, now: Instant, store: &VehicleStore) -> bool {
        if let Some(last) = self.last_tick {
            if now.duration_since(last) < self.tick_interval {
                return false;
            }
        }
        self.last_tick = Some(now);

        let wall_clock_secs = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let _: Result<(), std::convert::Infallible> =
            store.update(|state| Ok((self.step(wall_clock_secs, state), ())));

        let state = store.snapshot();
        tracing::debug!(
            "[DriveCycle] speed {:.1} km/h, battery {:.2}%",
            state.speed_kmh,
            state.battery_pct
        );
        true
    }
}

impl Default for DriveSimulator {
    fn default() -> Self {
        Self::new(Box::new(UrbanCycle), Duration::from_secs(1))
    }
}
