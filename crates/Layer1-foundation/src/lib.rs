//! # dcc-foundation
//!
//! Foundation layer for dccbot:
//! - Error: one error taxonomy for admission, work area and conversion
//! - Config: BotConfig, QuotaLimits, ToolchainConfig
//! - Storage: JsonStore (atomic whole-file JSON documents)
//! - Strings: message truncation helpers

pub mod config;
pub mod error;
pub mod storage;
pub mod strings;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    Allowance, BotConfig, ConverterConfig, PathsConfig, QuotaCheck, QuotaLimits,
    SignatureConfig, ToolchainConfig, BOT_CONFIG_FILE, DEFAULT_CONVERSION_LIMIT,
    DEFAULT_MAX_INPUT_BYTES, TOOLCHAIN_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;

// ============================================================================
// Strings
// ============================================================================
pub use strings::{truncate_chars, truncate_detail, MAX_DETAIL_CHARS};
