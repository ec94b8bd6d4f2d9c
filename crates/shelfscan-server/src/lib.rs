//! REST API server: batch submission and progress, product queries,
//! authentication and OpenAPI documentation.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
