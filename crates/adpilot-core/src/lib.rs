pub mod api;
pub mod automation;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod initialization;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod rate_limiter;
pub mod retry;
pub mod schedule;
pub mod store;
pub mod sync_job;
pub mod types;
pub mod tz;

pub use engine::Engine;
pub use error::{AdpilotError, Result};
