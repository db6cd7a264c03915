//! Shared helpers for the coalesce integration tests
//!
//! Graph fixtures seed a store with categories and documents; scripted
//! resolvers stand in for the llm-orc ensemble.

#![allow(dead_code)]

pub mod fixtures;
pub mod resolvers;

pub use fixtures::{assert_sanitized, category, document, memory_store, mention, names_of};
pub use resolvers::{CountingResolver, FailingResolver, MergeAllResolver};
