//! Process converter - runs the external `dcc` tool
//!
//! Invocation: `<program> <args...> -a <input> -o <output> [--obfuscate]
//! [--filter <file>] [--custom-loader <class>] [--source-dir <dir>]
//! --project-archive <zip>`, with the configured working directory. The tool
//! works on `project/jni` below that directory, which is why jobs are
//! bracketed by the work area guard.

use crate::executor::Converter;
use crate::options::ConversionOptions;
use dcc_foundation::{ConverterConfig, Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

/// Lines of tool output kept in an error detail
const ERROR_TAIL_LINES: usize = 5;

pub struct DccConverter {
    config: ConverterConfig,
}

impl DccConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Build the command line for one conversion
    pub fn build_command(&self, input: &Path, options: &ConversionOptions) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("-a")
            .arg(input)
            .arg("-o")
            .arg(&options.output_path);

        if options.obfuscate {
            cmd.arg("--obfuscate");
        }
        if let Some(filter) = &options.filter_file {
            cmd.arg("--filter").arg(filter);
        }
        cmd.arg("--custom-loader").arg(&options.custom_loader);
        if let Some(dir) = &options.project_dir {
            cmd.arg("--source-dir").arg(dir);
        }
        cmd.arg("--project-archive").arg(&options.source_archive);

        cmd.current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Converter for DccConverter {
    fn convert(&self, input: &Path, options: &ConversionOptions) -> Result<()> {
        let mut cmd = self.build_command(input, options);
        debug!("Running converter: {:?}", cmd);

        let started = Instant::now();
        let output = cmd.output().map_err(|e| {
            Error::Conversion(format!(
                "failed to start {}: {}",
                self.config.program, e
            ))
        })?;

        if output.status.success() {
            info!(
                "Converter finished in {:.1}s",
                started.elapsed().as_secs_f64()
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = match tail_lines(&stderr, ERROR_TAIL_LINES) {
            t if t.is_empty() => tail_lines(&stdout, ERROR_TAIL_LINES),
            t => t,
        };
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        Err(Error::Conversion(if detail.is_empty() {
            format!("converter exited with {}", code)
        } else {
            format!("converter exited with {}: {}", code, detail)
        }))
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.program).is_ok()
    }

    fn name(&self) -> &'static str {
        "dcc"
    }
}

/// Last `n` non-empty lines
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
