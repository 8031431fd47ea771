//! HTTP request handlers.
//!
//! - [`health`]: liveness probe
//! - [`relight`]: background replacement and relighting

pub mod health;
pub mod relight;
