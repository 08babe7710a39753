//! Config - service settings
//!
//! - `bot.rs` - BotConfig (paths, limits, converter invocation)
//! - `limits.rs` - per-user quota limits
//! - `toolchain.rs` - the converter's `dcc.cfg`

mod bot;
mod limits;
mod toolchain;

pub use bot::{
    BotConfig, ConverterConfig, PathsConfig, BOT_CONFIG_FILE, DEFAULT_MAX_INPUT_BYTES,
};
pub use limits::{Allowance, QuotaCheck, QuotaLimits, DEFAULT_CONVERSION_LIMIT};
pub use toolchain::{SignatureConfig, ToolchainConfig, TOOLCHAIN_CONFIG_FILE};
