//! Storage module for dccbot
//!
//! - `json`: flat JSON documents (config, quota counters)

mod json;

pub use json::JsonStore;
