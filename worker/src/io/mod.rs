//! I/O adapters for the invocation pipeline.

pub mod chat;
pub mod config;
pub mod git;
pub mod github;
pub mod lock;
pub mod process;
