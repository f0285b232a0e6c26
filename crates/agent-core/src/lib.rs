//! Core abstractions shared by the consensus workspace
//!
//! This crate defines the [`Agent`] trait that every external information or
//! opinion source implements, the [`Context`] passed alongside each request,
//! and the common [`Error`] type.

pub mod agent;
pub mod context;
pub mod error;

pub use agent::Agent;
pub use context::Context;
pub use error::{Error, Result};
