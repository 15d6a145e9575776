pub mod api;
pub mod app;
pub mod config;
pub mod interaction;
pub mod lifecycle;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod recovery;
pub mod session;
pub mod shared;
