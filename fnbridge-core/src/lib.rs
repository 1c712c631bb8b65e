//! Core types and rules for fnbridge
//!
//! This crate holds everything that does not talk to the platform: runtime
//! identities and their resource-name codec, platform limits, the error
//! taxonomy and the immutable backend configuration.

pub mod config;
pub mod error;
pub mod identity;
pub mod limits;

pub use config::BackendConfig;
pub use error::{BackendError, ErrorCode};
pub use identity::{ResourceNamer, RuntimeIdentity, RuntimeKey};
