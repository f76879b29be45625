//! meshforge - orchestrates hosted image-to-3D pipelines.
//!
//! Library exposing the core modules for the binary and for tests.

pub mod backend;
pub mod detect;
pub mod error;
pub mod invoker;
pub mod notify;
pub mod operations;
pub mod pipeline;
pub mod ratelimit;
pub mod service;
pub mod telemetry;
pub mod web;

pub use detect::BackendVariant;
pub use error::ForgeError;
pub use service::ForgeContext;
