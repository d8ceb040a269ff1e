//! Oracle access and output recovery.
//!
//! The generative backend is a black box that may be slow, may return
//! malformed structured content, and may be unreachable. This crate holds the
//! client that talks to it and the interpreter that salvages structure from
//! whatever it returns.

pub mod client;
pub mod extract;
pub mod prompts;

pub use client::{HttpOracle, Oracle, OracleConfig, OracleError};
