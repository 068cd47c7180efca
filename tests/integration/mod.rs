//! Integration tests for ripple_drive
//!
//! Everything runs in-process against temporary project directories:
//! control channel round trips over a real UNIX socket, CLI commands,
//! a guardian supervising `/bin/sh` workers, a worker serving HTTP on a
//! shared SO_REUSEPORT address, and a guardian running the built `ripple`
//! binary as its workers.
//!
//! Run with: cargo test --test integration

mod helpers;

mod cli;
mod control_channel;
mod guardian;
mod process_workers;
mod worker_http;
