//! KADORI karaoke session server library.
//! This crate exposes internal modules for integration testing and for Rust
//! clients of the session protocol.
//! The binary entry point is in main.rs.

pub mod client;
pub mod config;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;
