//! Node-local GPU and MIG allocation engine for a dynamic resource allocation
//! plugin.
//!
//! [`domain::DeviceState`] binds whole GPUs and carved MIG devices to resource
//! claims and keeps the node's `NodeAllocationState` record consistent with
//! what has been handed out, so a restarted plugin resumes where it left off.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
