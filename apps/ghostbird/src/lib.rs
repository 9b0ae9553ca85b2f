//! Keeps a local document in sync with an external editor over the GhostText
//! protocol.

pub mod compose;
pub mod config;
pub mod editor;
pub mod heart;
pub mod registry;
pub mod runner;
pub mod session;
pub mod telemetry;
pub mod transport;
