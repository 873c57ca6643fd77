//! Swarm Fleet — coordination core for a fleet of automated worker sessions.

pub mod channels;
pub mod config;
pub mod error;
pub mod fleet;
pub mod session;
