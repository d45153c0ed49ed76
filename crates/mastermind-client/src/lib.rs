//! # mastermind-client
//!
//! Device-side library behind the Masterminds app: a typed client for the
//! group backend, a local cache of groups, members and messages, and the
//! payment flows that take a user action from wallet round trip to a
//! recorded membership.
//!
//! Rendering is left to the embedding app. It drives a
//! [`MastermindService`], scopes results to its screens with [`ViewScope`]
//! and listens to [`ClientEvent`]s.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod flows;
pub mod inflight;
pub mod state;

pub use backend::GroupBackendClient;
pub use config::ClientConfig;
pub use error::{BackendError, FlowError};
pub use events::ClientEvent;
pub use flows::{GroupDraft, JoinOutcome, MastermindService};
pub use inflight::{InFlight, PollerHandle, ViewScope};
