//! Realtime car assistant client.
//!
//! Holds a live streaming session with a speech model service, runs the
//! model's function calls against a simulated vehicle, and aggregates token
//! usage and latency across the session.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod vehicle;

pub use config::{ConfigOverride, SessionConfig};
pub use error::{ConfigError, SessionError, ToolError};
pub use session::{ConnectionSettings, SessionController, SessionNotification, SessionState};
pub use telemetry::{Metrics, UsageSample};
pub use vehicle::{VehicleState, VehicleStore};
