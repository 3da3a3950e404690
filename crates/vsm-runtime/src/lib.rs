#[macro_use]
mod log_macros;

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod logger;
pub mod replay;
pub mod tracing_init;

#[cfg(test)]
mod engine_tests;
