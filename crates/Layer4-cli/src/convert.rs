//! dccbot convert command - terminal front end for one conversion
//!
//! Stages the local file into the downloads directory, submits it, prints
//! progress until the job ends and cancels the job on Ctrl-C. Before
//! returning it waits for a cancelled converter to stop, so the work area is
//! restored after the converter's last write.

use dcc_foundation::{BotConfig, Error};
use dcc_task::{Converter, DccConverter, JobController, JobStatus, UserId};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn run_convert(
    config: &BotConfig,
    user: &str,
    input: &Path,
    caption: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let converter = DccConverter::new(config.converter.clone());
    if !converter.is_available() {
        warn!(
            "Converter program '{}' not found on PATH",
            config.converter.program
        );
    }

    let controller = JobController::from_bot_config(config, Arc::new(converter));
    let user_id = UserId::from(user);

    println!("📥 Receiving {}...", input.display());
    let staged = controller.staging_path(&user_id, input);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(input, &staged)?;

    let mut handle = match controller.submit(user_id.clone(), &staged, caption) {
        Ok(handle) => handle,
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&staged) {
                debug!("Cannot remove {}: {}", staged.display(), remove_err);
            }
            anyhow::bail!("{}", rejection_message(&e));
        }
    };
    println!("✅ APK received! Job {}", handle.job_id());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            status = handle.changed() => match status {
                Some(JobStatus::Pending(progress)) => println!("{}", progress.message()),
                _ => break,
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                println!("🛑 Cancelling...");
                if let Err(e) = controller.cancel(&user_id) {
                    warn!("Cancel failed: {}", e);
                }
            }
        }
    }

    let outcome = handle.wait().await;
    println!("{}", outcome.message());

    if cancel_requested {
        println!("⏳ Waiting for the converter to stop...");
    }
    controller.shutdown().await;

    let succeeded = outcome.is_success();
    if let Some(artifact) = outcome.into_artifact() {
        let dest = out.unwrap_or_else(|| default_destination(input));
        let delivered = artifact.persist_to(&dest)?;
        println!("📤 Saved to {}", delivered.display());
    }

    if !succeeded {
        anyhow::bail!("conversion did not complete");
    }
    Ok(())
}

/// What to tell the user when a submission is not accepted
fn rejection_message(error: &Error) -> String {
    if error.is_admission() {
        format!("❌ {}", error)
    } else if error.is_user_facing() {
        error.to_string()
    } else {
        warn!("Submission failed: {}", error);
        "Internal error".to_string()
    }
}

/// `<name>_converted.apk` in the current directory
fn default_destination(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    PathBuf::from(format!("{}_converted.apk", stem))
}
