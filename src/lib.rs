//! Provider Hub: a config-driven registry and dispatcher for third-party APIs.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod providers;
pub mod request;
pub mod secrets;
pub mod template;
pub mod tiers;

pub use error::{Error, Result};
pub use hub::{CallOutcome, ProviderCall, ProviderHub};
