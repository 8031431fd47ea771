//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - `POST /api/v1/replace-background-relight`: run the edit pipeline for one image
//! - `GET /health`: liveness check
//!
//! All endpoints are documented with `utoipa`; the document is served at `/api-docs/openapi.json`
//! and rendered at `/docs`.

pub mod handlers;
pub mod models;
