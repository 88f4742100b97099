//! The module command plane.
//!
//! Operators discover running modules and dispatch administrative
//! commands to them by name through the [`broker::CommandBroker`];
//! modules register on the broker's backend and answer through the
//! reply engine in [`crate::replier`]. Message formats live in
//! [`messages`]; the operator-side client in [`client`].

pub mod broker;
pub mod client;
pub mod messages;

pub use broker::{CommandBroker, CommandConfig};
pub use client::CommandClient;
pub use messages::*;
