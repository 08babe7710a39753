//! Converter trait

use crate::options::ConversionOptions;
use dcc_foundation::Result;
use std::path::Path;

/// The external transformation, treated as opaque.
///
/// Implementations block until the conversion finishes and may take minutes.
/// They are only ever called from a blocking worker, never from the async
/// control loop.
pub trait Converter: Send + Sync {
    /// Convert `input`, writing the result to `options.output_path`
    fn convert(&self, input: &Path, options: &ConversionOptions) -> Result<()>;

    /// Check if the converter can run at all
    fn is_available(&self) -> bool {
        true
    }

    /// Get converter name
    fn name(&self) -> &'static str;
}
