//! Secure-channel, verification, and session-FSM core for NTAG424 DNA
//! access control terminals.
//!
//! A host embeds this crate by implementing the four external
//! collaborator traits ([`reader::Reader`], [`secrets::SecretsProvider`],
//! [`cloud::CloudClient`], [`usage_sink::UsageSink`]) and starting a
//! [`core::CoreHandle`]; from there the core runs its own verification
//! and session-tracking loops and exposes [`core::CoreHandle::get_snapshot`]
//! for the host's UI to read.

pub mod auth_cache;
pub mod cloud;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod event_pump;
pub mod key_provider;
pub mod reader;
pub mod secrets;
pub mod secure_messaging;
pub mod session_fsm;
pub mod tag;
pub mod types;
pub mod usage_sink;
pub mod verifier;

pub use config::CoreConfig;
pub use core::CoreHandle;
pub use error::{Error, ErrorKind, Result};
pub use event_pump::UiAction;
pub use types::{AppStateSnapshot, SessionSnapshot, SessionStateId, VerificationSnapshot, VerificationState};
