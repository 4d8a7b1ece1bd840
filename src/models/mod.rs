//! Request and Response models for the relay API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{BatchBody, RelayQuery, REFRESH_KEY, TTL_KEY};
pub use responses::{
    BatchResponse, ClearResponse, ErrorResponse, HealthResponse, InvalidateResponse,
    StatsResponse,
};
