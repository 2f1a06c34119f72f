// memorybot-core: shared library for the memorybot application.

pub mod types;
pub mod config;
pub mod store;
pub mod embedding;
pub mod retrieval;
pub mod fusion;
pub mod context;
pub mod provider;
pub mod vision;
pub mod throttle;
pub mod ingest;
pub mod chat;
pub mod warning;

// Test utilities - always available for use by memorybot-server and tests
pub mod testutil;
