//! API Module
//!
//! HTTP handlers and routing for the local relay.
//!
//! # Endpoints
//! - `GET /v1/*endpoint` - Cached relay of an upstream endpoint
//! - `DELETE /v1/*endpoint` - Invalidate one cached request
//! - `POST /batch` - Partitioned fan-out with merged results
//! - `DELETE /cache` - Clear both cache tiers
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
