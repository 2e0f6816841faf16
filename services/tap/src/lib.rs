//! Ephemeral topic subscriber.
//!
//! # Purpose
//! Provisions a uniquely named queue, subscribes it to an existing topic,
//! prints what arrives, and removes the subscription and then the queue on
//! every exit path.
//!
//! # Layout
//! - `identity`, `provision`, `subscribe`: the ordered acquisition steps
//! - `drain`, `output`: the background loop and its stdout writer
//! - `teardown`: the release stack
//! - `lifecycle`: the state machine tying them together
//! - `config`, `cli`, `observability`, `stop`: process plumbing
pub mod cli;
pub mod config;
pub mod drain;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod output;
pub mod provision;
pub mod stop;
pub mod subscribe;
pub mod teardown;
