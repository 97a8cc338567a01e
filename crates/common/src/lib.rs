//! Common types shared across the Beebo crates.
//!
//! Only the error taxonomy lives here so that the LLM, memory and API crates
//! agree on how failures are classified.

pub mod error;

pub use error::{BeeboError, Result};
