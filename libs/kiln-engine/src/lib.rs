//! Execution engine for kiln, the backend of an online code-running
//! service.
//!
//! A submission creates per-job file-system resources, builds a step
//! producer for the requested SDK, and detaches a pipeline task that walks
//! Validate → Prepare → Compile → Run, racing every step against a global
//! deadline and a client cancellation flag. All observable job state lives
//! in the shared state store; the polling operations in [`service`] never
//! talk to a pipeline directly.

pub mod pipeline;
pub mod service;
pub mod steps;
pub mod workspace;

#[cfg(test)]
mod testutil;
