//! Gardenlet Engine - MiniJinja templating for component configuration files
//!
//! This crate provides an owned, explicitly constructed template engine with:
//! - YAML-friendly filters (toyaml, indent, quote)
//! - Whitespace handling that keeps rendered YAML byte-stable
//! - Diagnostics pointing at the failing template line

pub mod engine;
pub mod error;
pub mod filters;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result, TemplateError};
