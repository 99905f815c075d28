//! Storage infrastructure: the optional TOML configuration file.
//!
//! The broker keeps no state on disk.  The only file it ever reads is its
//! configuration, handled by the `config` sub-module.

pub mod config;
