#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod directory;
pub mod server;
pub mod telemetry;
