pub mod agent;
pub mod compose;
pub mod config;
pub mod errors;
pub mod instruction;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod scm;
pub mod server;
pub mod telemetry;
pub mod util;
pub mod webhook;
pub mod workspace;
