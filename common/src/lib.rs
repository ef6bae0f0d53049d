// Shared library for the backend service and the desktop launcher

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod launch;
pub mod readiness;
pub mod shell;
pub mod telemetry;
