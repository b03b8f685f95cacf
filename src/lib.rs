#![allow(clippy::result_large_err)]

//! `initd-rs` is the core of a Linux early-userspace init system: a PID-1
//! service supervisor and the property service it exposes to the rest of
//! userspace.
//!
//! It contains:
//! - Service lifecycle management (fork/exec, sandboxing, crash policy)
//! - The shared property namespace with access control and persistence
//! - The property socket server and its wire protocol
//! - Platform abstractions (capabilities, cgroups, SELinux, proc attributes)
//! - Configuration loading

pub mod config;
pub mod entrypoints;
pub mod logging;
pub mod platform;
pub mod properties;
pub mod runtime_info;
pub mod services;
pub mod signal_handler;
pub mod util;

#[cfg(test)]
mod tests;
