//! # tinkerer-types
//!
//! Wire format types for the Tinkerer agent control plane.
//!
//! This crate provides the types shared between the control plane and the
//! agents it drives:
//! - [`Agent`] - Identity and instance metadata of a connected agent
//! - [`OperationRequest`] - A unit of work sent to one agent
//! - [`OperationFragment`] - One chunk of an operation's result
//! - [`MessageError`] - Wire-level error types
//!
//! All wire messages are camelCase JSON text frames exchanged over one
//! persistent duplex connection per agent.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod agent;
mod error;
mod operation;

pub use agent::Agent;
pub use error::MessageError;
pub use operation::{OperationCode, OperationFragment, OperationRequest};
