//! API request/response models.

pub mod relight;
