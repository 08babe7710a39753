//! Toolchain config - the converter's own `dcc.cfg`
//!
//! The external tool reads this file from its working directory. The service
//! only creates it with defaults and reports on it.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const TOOLCHAIN_CONFIG_FILE: &str = "dcc.cfg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default)]
    pub apktool: String,

    #[serde(default)]
    pub ndk_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub keystore_path: String,
    pub alias: String,
    pub keystore_pass: String,
    pub store_pass: String,
    pub v1_enabled: bool,
    pub v2_enabled: bool,
    pub v3_enabled: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            apktool: "tools/apktool.jar".to_string(),
            ndk_dir: String::new(),
            signature: Some(SignatureConfig {
                keystore_path: "tools/debug.keystore".to_string(),
                alias: "androiddebugkey".to_string(),
                keystore_pass: "android".to_string(),
                store_pass: "android".to_string(),
                v1_enabled: true,
                v2_enabled: true,
                v3_enabled: true,
            }),
        }
    }
}

impl ToolchainConfig {
    /// Read `<dir>/dcc.cfg` if present
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        JsonStore::new(dir).load_optional(TOOLCHAIN_CONFIG_FILE)
    }

    /// Write the default `dcc.cfg` unless one exists. Returns whether a file
    /// was written.
    pub fn write_default_if_missing(dir: &Path) -> Result<bool> {
        let store = JsonStore::new(dir);
        if store.exists(TOOLCHAIN_CONFIG_FILE) {
            return Ok(false);
        }
        store.save(TOOLCHAIN_CONFIG_FILE, &Self::default())?;
        Ok(true)
    }

    pub fn has_ndk(&self) -> bool {
        !self.ndk_dir.trim().is_empty()
    }

    pub fn has_signing(&self) -> bool {
        self.signature.is_some()
    }
}
