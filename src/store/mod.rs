//! Persistence layer — libSQL-backed storage for messages and mailbox state.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{MailStore, MailboxState, StoredEmail, UpsertResult};
