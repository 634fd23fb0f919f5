//! Registry module for the market engine
//!
//! This module provides the registry trait and implementations.

mod memory;
mod traits;

pub use memory::InMemoryRegistry;
pub use traits::*;
