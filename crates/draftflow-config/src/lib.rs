//! Draftflow Config
//!
//! This crate contains the serializable settings for a draftflow process.
//! Settings are read from a JSON file; every field has a default so an empty
//! object (or no file at all) yields a working local configuration.
//!
//! ```json
//! {
//!   "server": { "bind": "0.0.0.0:3000" },
//!   "flows": { "poll_interval_ms": 250 },
//!   "generator": { "model": "gpt-4.1" }
//! }
//! ```

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{ContentSettings, FlowSettings, GeneratorSettings, ServerSettings, Settings};
