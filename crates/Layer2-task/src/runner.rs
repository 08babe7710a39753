//! Conversion Runner - executes the converter on the blocking worker pool
//!
//! The converter call takes seconds to minutes and blocks its thread, so it
//! never runs on the async control context. Whatever happens inside it (an
//! error, a missing output, a panic) the worker delivers exactly one
//! [`ConversionResult`] on its completion channel.

use crate::executor::Converter;
use crate::options::ConversionOptions;
use dcc_foundation::Error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result of one converter invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    /// Converter succeeded and the output file exists
    Ok(PathBuf),
    Failed(String),
}

impl ConversionResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ConversionResult::Ok(_))
    }
}

#[derive(Clone)]
pub struct ConversionRunner {
    converter: Arc<dyn Converter>,
}

impl ConversionRunner {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }

    pub fn converter_name(&self) -> &'static str {
        self.converter.name()
    }

    pub fn is_available(&self) -> bool {
        self.converter.is_available()
    }

    /// Run the converter once on the calling thread. Never panics.
    pub fn run(&self, input: &Path, options: &ConversionOptions) -> ConversionResult {
        debug!(
            "Running {} on {} -> {}",
            self.converter.name(),
            input.display(),
            options.output_path.display()
        );

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.converter.convert(input, options)));

        match outcome {
            Ok(Ok(())) if options.output_path.is_file() => {
                ConversionResult::Ok(options.output_path.clone())
            }
            Ok(Ok(())) => ConversionResult::Failed("Output APK not found".to_string()),
            Ok(Err(Error::Conversion(detail))) => ConversionResult::Failed(detail),
            Ok(Err(e)) => ConversionResult::Failed(e.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Converter {} panicked: {}", self.converter.name(), message);
                ConversionResult::Failed(format!("converter panicked: {}", message))
            }
        }
    }

    /// Run on the blocking pool; the receiver resolves with the result.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        &self,
        input: PathBuf,
        options: ConversionOptions,
    ) -> oneshot::Receiver<ConversionResult> {
        let (tx, rx) = oneshot::channel();
        let runner = self.clone();

        tokio::task::spawn_blocking(move || {
            let result = runner.run(&input, &options);
            if tx.send(result).is_err() {
                debug!("Conversion result for {} had no receiver", input.display());
            }
        });

        rx
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
