//! # checkin-agent
//!
//! Headless host for the beacon proximity pipeline.
//!
//! Runs one pipeline per configured API credential, each with its own
//! channel-fed scanner, and replays scanner events from JSON-lines feeds.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod config;
pub mod feed;
pub mod logging;
pub mod state;
