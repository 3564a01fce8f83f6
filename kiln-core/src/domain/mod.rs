//! Core domain types
//!
//! These types describe a submitted job as it moves from an uploaded bundle
//! through image build and execution. The server persists them; the client
//! and CLI only read them.

pub mod bundle;
pub mod event;
pub mod handle;
pub mod job;
