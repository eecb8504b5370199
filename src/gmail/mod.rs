//! Gmail API integration — auth plumbing, REST client, wire types.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::TokenProvider;
pub use client::{GmailApi, GmailHttpClient};
