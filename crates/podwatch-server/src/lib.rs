//! # podwatch-server
//!
//! HTTP server library for podwatch, the Smart Diaper Pod monitor.
//!
//! This library provides the API handlers and state management for podwatch.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
