//! Data Transfer Objects for REST request/response serialization.
//!
//! Idempotency references are spelled `ref` on the wire and `op_ref`
//! in Rust.

pub mod credit_dto;

pub use credit_dto::*;
