//! Common types and utilities for the energy market
//!
//! This crate provides shared types used across all market crates.
//!
//! # Modules
//!
//! - [`error`] - Invalid market settings
//! - [`types`] - Typed identifiers (GameId, ProsumerId, ...) and roles

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
