//! Conversion options
//!
//! Submissions carry a free-form caption. Recognized tokens:
//!
//! - `--obfuscate`
//! - `--filter <path>`
//! - `--custom-loader <identifier>`
//!
//! Everything else is ignored. Quoted values are supported, e.g.
//! `--filter "my filters/rules.txt"`.

use dcc_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FLAG_OBFUSCATE: &str = "--obfuscate";
const FLAG_FILTER: &str = "--filter";
const FLAG_CUSTOM_LOADER: &str = "--custom-loader";

/// Options requested by the submitter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionOptions {
    pub obfuscate: bool,
    pub filter: Option<PathBuf>,
    pub custom_loader: Option<String>,
}

impl CaptionOptions {
    /// Parse a caption. Never fails; see [`CaptionOptions::validate`].
    pub fn parse(caption: &str) -> Self {
        let tokens = shlex::split(caption)
            .unwrap_or_else(|| caption.split_whitespace().map(str::to_string).collect());

        let mut options = Self::default();
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            match token.as_str() {
                FLAG_OBFUSCATE => options.obfuscate = true,
                FLAG_FILTER => {
                    if let Some(value) = iter.next_if(|next| !next.starts_with("--")) {
                        options.filter = Some(PathBuf::from(value));
                    }
                }
                FLAG_CUSTOM_LOADER => {
                    if let Some(value) = iter.next_if(|next| !next.starts_with("--")) {
                        options.custom_loader = Some(value);
                    }
                }
                _ => {}
            }
        }

        options
    }

    /// Reject values the converter cannot accept
    pub fn validate(&self) -> Result<()> {
        if let Some(loader) = &self.custom_loader {
            if !is_class_name(loader) {
                return Err(Error::InvalidInput(format!(
                    "custom loader '{}' is not a class name",
                    loader
                )));
            }
        }
        Ok(())
    }
}

/// `a.b.C`, `C$Inner`; segments must not start with a digit
fn is_class_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

/// Fully resolved options handed to the converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub obfuscate: bool,
    pub filter_file: Option<PathBuf>,
    pub custom_loader: String,
    pub output_path: PathBuf,
    pub project_dir: Option<PathBuf>,
    pub source_archive: PathBuf,
}

impl ConversionOptions {
    /// Combine caption options with service defaults.
    ///
    /// A requested filter file is only used when it exists; otherwise the
    /// default filter applies.
    pub fn resolve(
        caption: &CaptionOptions,
        output_path: impl Into<PathBuf>,
        defaults: &dcc_foundation::ConverterConfig,
    ) -> Self {
        let filter_file = caption
            .filter
            .as_deref()
            .filter(|p| p.exists())
            .map(Path::to_path_buf)
            .or_else(|| Some(defaults.default_filter_file.clone()));

        Self {
            obfuscate: caption.obfuscate,
            filter_file,
            custom_loader: caption
                .custom_loader
                .clone()
                .unwrap_or_else(|| defaults.default_custom_loader.clone()),
            output_path: output_path.into(),
            project_dir: defaults.project_dir.clone(),
            source_archive: defaults.source_archive.clone(),
        }
    }
}
