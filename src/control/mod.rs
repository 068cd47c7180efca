//! Out-of-band control channel between the CLI and a running guardian.
//!
//! The channel is a UNIX-domain stream socket bound at
//! `<project>/runtime/ripple.pipe` (owner-only). Each message is a JSON
//! [`Command`] envelope wrapped in a [`crate::frame`] frame. The CLI
//! side correlates replies by command id, so the guardian may answer
//! concurrent commands in any order.

mod client;
mod command;
mod error;
mod server;

pub use client::ControlClient;
pub use command::{Action, Command, Reply, UnknownCommand};
pub use error::ChannelError;
pub use server::{handle_connection, CommandHandler, ControlServer};
