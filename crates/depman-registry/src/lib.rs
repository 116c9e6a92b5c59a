//! HTTP client for depman's optional registry source backend: a
//! centralized, forge-independent alternative to deducing a project's
//! location from its import path.

mod client;
mod error;

pub use client::{RegistryClient, VersionInfo};
pub use error::RegistryError;
