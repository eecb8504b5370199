//! Mailroom — Gmail change-notification ingestion service.
//!
//! Decodes Pub/Sub push deliveries, resolves mailbox history deltas, fetches
//! and normalizes new messages, upserts them into a libSQL store, and answers
//! with the status code that drives Pub/Sub's retry behavior.

pub mod config;
pub mod error;
pub mod gmail;
pub mod ingest;
pub mod jobs;
pub mod server;
pub mod store;
