//! Configuration module.
//!
//! - `session`: SessionConfig document, overrides and validation
//! - `defaults`: default values and serde default functions
//! - `io`: locating and loading documents

mod defaults;
mod io;
mod session;

pub use defaults::{DEFAULT_AUDIO_FORMAT, DEFAULT_MODEL, DEFAULT_VOICE};
pub use io::{get_config_path, load_session_config, load_startup_config};
pub use session::{ConfigOverride, SessionConfig, ToolDeclaration, TurnDetection};
