//! Command implementations for the channels CLI

pub mod apply;
pub mod get;
