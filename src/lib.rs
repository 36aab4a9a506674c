//! Background service of the tabmon browser task manager.
//!
//! [`Background`] owns the tab and download stats stores and lends them to
//! event ingestion, the monitoring loop, persistence and queries. Everything
//! runs on a single thread; [`app::run`] must be driven inside a
//! `tokio::task::LocalSet`.

pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod ipc;
pub mod query;
pub mod state;

pub use config::Config;
pub use error::Error;
pub use events::{HostEvent, InstallReason};
pub use state::Background;
