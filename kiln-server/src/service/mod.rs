//! Service Module
//!
//! Business logic between the HTTP layer and the cluster. `job` composes the
//! stage services into the submission pipeline.

pub mod build;
pub mod ingest;
pub mod job;
pub mod launch;
pub mod lifecycle;
