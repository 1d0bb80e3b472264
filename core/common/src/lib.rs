//! Common utilities and types shared across InvisiLock crates.
//!
//! This crate provides the error taxonomy every layer reports through and
//! the small payload types callers use to describe what they protect.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result, AUTHENTICATION_FAILED};
pub use types::{ImageFormat, PayloadKind, SensitiveBytes};
