//! Data transfer objects
//!
//! Request and response bodies exchanged between the server and its clients.

pub mod job;
pub mod upload;
