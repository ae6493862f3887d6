//! IPC module for client-overlay communication

mod client;
mod protocol;
mod server;

pub use client::{parse_command, send, USAGE};
pub use server::Server;
