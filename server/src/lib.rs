//! Blobfield server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod accounts;
pub mod config;
pub mod connection;
pub mod consume;
pub mod hub;
pub mod registry;
pub mod spawn;
pub mod states;
pub mod world;
pub mod ws;
