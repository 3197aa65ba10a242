// ABOUTME: Library root for fleetsh - exposes the SSH execution layer.
// ABOUTME: The command-line binary is in main.rs.

pub mod config;
pub mod error;
pub mod fleet;
pub mod ssh;
