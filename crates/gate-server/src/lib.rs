//! gate-server library crate.
//!
//! The binary in `main.rs` wires these pieces into a running gate:
//!
//! ```text
//! gate-server
//!   ├── echo      EchoRouter: id + JSON body, echoed to the sender
//!   └── notices   logs connection open/close notices from the dispatcher
//! ```
//!
//! # For beginners: what is a router here?
//!
//! The networking crates only move bytes.  A router turns an `id + body`
//! payload into an application message, handles it, and turns replies back
//! into bytes.  Swap [`echo::EchoRouter`] for your own game logic and the
//! transports stay untouched.

/// Demonstration router.
pub mod echo;

/// Lifecycle notice consumer.
pub mod notices;
