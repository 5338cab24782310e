//! TETHER Protocol - Core constants and error types.
//!
//! This module is always compiled regardless of feature selection. It has
//! minimal dependencies and defines the shared error taxonomy plus the
//! protocol-wide timing and limit defaults.

mod constants;
mod error;

pub use constants::*;
pub use error::*;
