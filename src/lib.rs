// hookrelay: Library entry point.
// Exposes modules for integration testing.

pub mod config;
pub mod delivery;
pub mod event;
pub mod forward;
pub mod mock;
pub mod rate_limit;
pub mod recorder;
pub mod replay;
pub mod server;
