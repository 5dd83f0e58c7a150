mod classification;
mod labels;
mod model_service;
mod ort_service;
mod preprocessing;
mod routes;
mod server;
mod telemetry;
mod upload;

pub mod app;
pub mod config;

pub use app::start_app;
