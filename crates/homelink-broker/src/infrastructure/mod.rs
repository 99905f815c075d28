//! Infrastructure layer of the broker.
//!
//! Contains the OS-facing adapters: the TCP listener, the per-connection
//! handlers, and the configuration file loader.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `homelink_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
