//! Configuration for the channels CLI

pub mod settings;

pub use settings::{ApplySettings, ApplyStrategy, ChannelSettings, Settings};
