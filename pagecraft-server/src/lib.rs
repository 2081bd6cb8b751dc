//! HTTP front door for the pagecraft pipeline.

pub mod config;
pub mod intake;
