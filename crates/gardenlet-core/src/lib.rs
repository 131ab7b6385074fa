//! Gardenlet Core - cluster-independent building blocks for component deployers
//!
//! This crate provides the foundational types used by every component:
//! - `ObjectKey`: Stable identity of a desired object
//! - `Registry`: Serialises desired objects into a managed resource bundle
//! - `WaitTimings` / `DeployerConfig`: Polling configuration
//! - `ShootState`: Captured extension state used for restoration
//! - Content hashing for immutable ConfigMaps and Secrets

pub mod annotations;
pub mod config;
pub mod error;
pub mod hash;
pub mod key;
pub mod registry;
pub mod state;

pub use config::{DeployerConfig, TimingsOverride, WaitTimings};
pub use error::{CoreError, Result};
pub use hash::{compute_checksum, sha256_hex, unique_name};
pub use key::ObjectKey;
pub use registry::Registry;
pub use state::{CrossVersionObjectReference, ExtensionResourceState, NamedResourceReference, ShootState};
