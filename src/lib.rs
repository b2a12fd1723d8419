#![forbid(unsafe_code)]

//! Shared building blocks for the Twitch VOD tools. The binaries in
//! `src/bin` wire them together.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod filename;
pub mod logging;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod supervisor;
