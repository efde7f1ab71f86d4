pub mod config;
pub mod handler;
pub mod hosts;
pub mod request;
pub mod telemetry;
