//! Pure, deterministic logic: extraction, rule evaluation, call-site
//! scanning, runtime matching.
//!
//! Core modules must be free of I/O side effects. They operate on
//! in-memory data and return new values instead of mutating shared state,
//! so every piece is testable in isolation and a static scoring pass can
//! never race a dynamic one.

pub mod evaluate;
pub mod extract;
pub mod rules;
pub mod runtime_match;
pub mod scan;
