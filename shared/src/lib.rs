//! Wire protocol and gameplay constants shared by the blobfield server and its clients.

pub mod config;
pub mod geometry;
pub mod protocol;
