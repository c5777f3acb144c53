//! Real-time watch-party backend: playback arbitration, presence aggregation,
//! snapshot persistence, and WebRTC signaling, exposed as a library for the
//! server binary and integration tests.

mod config;
pub mod dao;
mod dto;
mod error;
pub mod routes;
pub mod services;
pub mod state;
