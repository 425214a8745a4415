//! Device-link broker service.
//!
//! Links network devices to this service with asymmetric keys and resolves
//! opaque service tags into authenticated device sessions, speaking to the
//! vendor directory service on both paths. Devices never talk to this
//! service directly: link callbacks arrive relayed through the directory,
//! and issued bearers are verified against the device through it as well.

pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod linker;
pub mod resolver;
pub mod signing;
pub mod store;
