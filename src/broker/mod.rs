//! TCP front end: accept loop and per-connection request handling.

pub mod connection;
pub mod server;
