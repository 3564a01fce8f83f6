//! Kiln Core
//!
//! Core types shared by the Kiln server, client and CLI.
//!
//! This crate contains:
//! - Domain types: jobs, phases, handles, status events, bundles
//! - DTOs: request/response bodies of the HTTP surface
//! - Error taxonomy shared by server responses and client parsing

pub mod domain;
pub mod dto;
pub mod error;
