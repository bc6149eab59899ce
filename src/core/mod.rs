//! Core runtime: configuration, shutdown coordination and the shared context

pub mod config;
pub mod context;
pub mod signal;
