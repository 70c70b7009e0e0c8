//! tempo: a countdown authority that outlives its clients
//!
//! One long-lived process owns the timer, persists it after every change,
//! and tells outside collaborators when focus mode starts and ends. Clients
//! talk to it over a Unix socket (see `tempo-ipc`).

pub mod authority;
pub mod config;
pub mod effects;
pub mod ipc;
pub mod observers;
pub mod persistence;
pub mod timer;

pub use authority::{Authority, AuthorityError, AuthorityHandle, AuthorityOptions};
