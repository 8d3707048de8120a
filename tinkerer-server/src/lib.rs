//! # tinkerer-server
//!
//! Control plane for executing shell operations on a fleet of short-lived
//! test-infrastructure agents.
//!
//! Each agent holds one persistent WebSocket connection to the server.
//! HTTP callers address an agent (directly or by test plan + instance
//! name), dispatch an operation over that connection, and read the result
//! back as a chunked stream of JSON fragments while the agent is still
//! producing them.
//!
//! ## Architecture
//!
//! ```text
//! test runner ──POST /test-plan/{id}/agent/{name}/operation──┐
//!                                                            │
//!        ┌───────────────────────────────────────────────────┴──┐
//!        │                 tinkerer-server                       │
//!        │  ┌───────────┐   ┌──────────────┐   ┌─────────────┐  │
//!        │  │  registry  │  │ queue store  │   │  heartbeat  │  │
//!        │  └─────┬─────┘   └──────┬───────┘   └──────┬──────┘  │
//!        └────────┼────────────────┼──────────────────┼─────────┘
//!                 │ WebSocket      │ fragments        │ PING
//!            agent A          agent B            agent C
//! ```
//!
//! The registry and the queue store are the only shared mutable state;
//! dispatch, streaming, abort, heartbeat, and sweep are stateless passes
//! over them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod server;
pub mod stream;
pub mod sweep;
pub mod ws;
