pub mod chatters;
pub mod config;
pub mod telemetry;
