//! # RPC Protocol Module
//!
//! Implements the ThingsBoard server-side RPC protocol for the thermal
//! device: parsing inbound command envelopes, validating parameters per
//! method, dispatching into the spot registry and encoding responses.
//!
//! ## Command Flow
//!
//! ```text
//! request topic suffix ──┐
//!                        ▼
//! payload ─▶ parser::parse_command ─▶ RpcCommand ─▶ RpcHandler::handle ─▶ RpcResponse
//!                                        │                  │
//!                                 parse rejection     registry dispatch
//!                                 (never dispatched)  (one lock, no partial writes)
//! ```
//!
//! Guarantees: every accepted command gets exactly one response, unknown
//! methods and malformed payloads are rejected at parse, and validation
//! failures never mutate registry state.

pub mod handler;
pub mod parser;
pub mod types;

pub use handler::RpcHandler;
pub use parser::{parse_command, validate_command, SpotIdPolicy};
pub use types::{error_codes, RpcCommand, RpcMethod, RpcResponse, RpcStatus};
