//! # mastermind-store
//!
//! The backend's store of record: groups, members, messages, usernames and
//! the payment signatures already spent on a create or join.
//!
//! Exposes a synchronous `Database` handle wrapping a
//! `rusqlite::Connection`, with typed helpers per table. Operations that
//! touch several tables (creating a group, recording a join) run in a single
//! SQLite transaction.

pub mod database;
pub mod groups;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod payments;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
