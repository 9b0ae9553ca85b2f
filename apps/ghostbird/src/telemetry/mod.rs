//! Process-wide diagnostics for the `ghostbird` binary.

pub mod logging;
