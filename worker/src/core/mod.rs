//! Deterministic, pure logic shared by the invocation pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (requests, captured output lines, changed paths) and return
//! deterministic outputs suitable for tests.

pub mod classifier;
pub mod output;
pub mod retry;
pub mod types;
