//! JobController integration tests - admission, cancellation, teardown
//!
//! `cargo test -p dcc-task --test controller_test`

use dcc_foundation::{Allowance, BotConfig, Error, Result};
use dcc_task::{
    ConversionOptions, Converter, JobController, JobHandle, JobProgress, JobStatus, OutcomeKind,
    UserId,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const OWNER: &str = "1000";
const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Fixtures
// ============================================================================

/// Blocks converter threads until opened
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        let (open, cvar) = &*self.0;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.0;
        let guard = open.lock().unwrap();
        let _ = cvar.wait_timeout_while(guard, WAIT, |open| !*open).unwrap();
    }
}

#[derive(Clone)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
    Gated(Gate),
    /// Succeeds, but deletes every work-area snapshot on the way
    DropSnapshots,
}

/// Stand-in for the external tool: scribbles over the work area like the
/// real one, then behaves as configured
struct FakeConverter {
    work_dir: PathBuf,
    backups_dir: PathBuf,
    behavior: Behavior,
}

impl FakeConverter {
    fn scribble(&self) {
        fs::write(self.work_dir.join("Android.mk"), b"LOCAL_MODULE := generated\n").unwrap();
        fs::write(self.work_dir.join("nc").join("generated.cpp"), b"int main;").unwrap();
    }
}

impl Converter for FakeConverter {
    fn convert(&self, input: &Path, options: &ConversionOptions) -> Result<()> {
        if let Behavior::Gated(gate) = &self.behavior {
            gate.wait();
        }
        self.scribble();
        match &self.behavior {
            Behavior::Succeed | Behavior::Gated(_) => {
                fs::copy(input, &options.output_path)?;
                Ok(())
            }
            Behavior::DropSnapshots => {
                fs::remove_dir_all(&self.backups_dir)?;
                fs::copy(input, &options.output_path)?;
                Ok(())
            }
            Behavior::Fail => Err(Error::Conversion(format!(
                "apktool failed: {}",
                "resource table corrupt ".repeat(20)
            ))),
            Behavior::Panic => panic!("segfault in native code"),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct Fixture {
    _temp: TempDir,
    config: BotConfig,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let mut config = BotConfig::default().with_owner(OWNER);
        config.poll_interval_ms = 10;
        let config = config.resolved(root);

        for dir in [
            &config.paths.downloads,
            &config.paths.output,
            &config.paths.tmp,
        ] {
            fs::create_dir_all(dir).unwrap();
        }
        let work = &config.paths.work_dir;
        fs::create_dir_all(work.join("nc")).unwrap();
        fs::write(work.join("Android.mk"), b"LOCAL_MODULE := stub\n").unwrap();
        fs::write(work.join("nc").join("Dex2C.cpp"), b"// stub\n").unwrap();

        Self {
            _temp: temp,
            config,
        }
    }

    fn controller(&self, behavior: Behavior) -> JobController {
        let converter = FakeConverter {
            work_dir: self.config.paths.work_dir.clone(),
            backups_dir: self.config.paths.backups.clone(),
            behavior,
        };
        JobController::from_bot_config(&self.config, Arc::new(converter))
    }

    fn input(&self, controller: &JobController, user: &str, size: usize) -> PathBuf {
        let path = controller.staging_path(&UserId::from(user), Path::new("app.apk"));
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.resize(size.max(4), 0xA5);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn work_tree(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        read_tree(&self.config.paths.work_dir)
    }

    fn pristine_tree() -> BTreeMap<PathBuf, Vec<u8>> {
        BTreeMap::from([
            (PathBuf::from("Android.mk"), b"LOCAL_MODULE := stub\n".to_vec()),
            (PathBuf::from("nc/Dex2C.cpp"), b"// stub\n".to_vec()),
        ])
    }

    fn output_files(&self) -> usize {
        fs::read_dir(&self.config.paths.output).unwrap().count()
    }
}

fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.insert(
                    path.strip_prefix(root).unwrap().to_path_buf(),
                    fs::read(&path).unwrap(),
                );
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

async fn wait_for_progress(handle: &mut JobHandle, progress: JobProgress) {
    tokio::time::timeout(WAIT, async {
        while handle.status() != JobStatus::Pending(progress) {
            if handle.changed().await.is_none() {
                panic!("job finished before reaching {:?}", progress);
            }
        }
    })
    .await
    .expect("timed out waiting for progress");
}

/// Open the gate from another thread after a short delay
fn open_later(gate: &Gate) -> std::thread::JoinHandle<()> {
    let gate = gate.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        gate.open();
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_success() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    let user = UserId::from("42");
    let input = fixture.input(&controller, "42", 2 * 1024 * 1024);

    assert_eq!(controller.quota().get_count(&user), 0);
    let handle = controller.submit(user.clone(), &input, "").unwrap();
    let outcome = handle.wait().await;

    match &outcome.kind {
        OutcomeKind::Succeeded {
            artifact,
            count,
            limit,
        } => {
            assert!(artifact.path().is_file());
            assert_eq!(fs::metadata(artifact.path()).unwrap().len(), 2 * 1024 * 1024);
            assert_eq!(*count, 1);
            assert_eq!(*limit, Some(5));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(outcome.warnings.is_empty());
    assert!(outcome.message().contains("Total conversions: 1/5"));

    assert_eq!(controller.quota().get_count(&user), 1);
    assert!(!input.exists());
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
    assert!(controller.work_area().stale_snapshots().is_empty());
    assert!(!controller.is_active(&user));

    // delivered artifacts are removed once the caller is done with them
    let artifact_path = outcome.artifact().unwrap().path().to_path_buf();
    drop(outcome);
    assert!(!artifact_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submit_single_flight() {
    let fixture = Fixture::new();
    let gate = Gate::default();
    let controller = fixture.controller(Behavior::Gated(gate.clone()));

    let inputs: Vec<PathBuf> = (0..8)
        .map(|_| fixture.input(&controller, "42", 64))
        .collect();

    let tasks: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|input| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("42", input, "") })
        })
        .collect();

    let mut handles = Vec::new();
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(handle) => handles.push(handle),
            Err(Error::AlreadyRunning(user)) => {
                assert_eq!(user, "42");
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(handles.len(), 1);
    assert_eq!(rejected, 7);
    assert_eq!(controller.active_count(), 1);

    gate.open();
    let outcome = handles.pop().unwrap().wait().await;
    assert!(outcome.is_success());
    assert_eq!(controller.active_count(), 0);
}

#[tokio::test]
async fn test_quota_boundary() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    let user = UserId::from("7");

    for _ in 0..4 {
        controller.quota().increment(&user).unwrap();
    }
    assert_eq!(controller.remaining(&user).remaining, Allowance::Limited(1));

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit(user.clone(), &input, "").unwrap().wait().await;
    assert!(outcome.is_success());
    assert_eq!(controller.quota().get_count(&user), 5);

    let input = fixture.input(&controller, "7", 128);
    match controller.submit(user.clone(), &input, "") {
        Err(Error::QuotaExceeded { user: u, limit }) => {
            assert_eq!(u, "7");
            assert_eq!(limit, 5);
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("submission over the limit was admitted"),
    }
    // rejected input stays with the caller, no job, no count
    assert!(input.exists());
    assert!(!controller.is_active(&user));
    assert_eq!(controller.quota().get_count(&user), 5);
}

#[tokio::test]
async fn test_owner_is_unlimited() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    let owner = UserId::from(OWNER);

    for _ in 0..10 {
        controller.quota().increment(&owner).unwrap();
    }
    let check = controller.remaining(&owner);
    assert!(check.allowed);
    assert_eq!(check.remaining, Allowance::Unlimited);

    let input = fixture.input(&controller, OWNER, 128);
    let outcome = controller.submit(owner.clone(), &input, "").unwrap().wait().await;
    assert!(outcome.message().contains("11/∞"));
}

#[tokio::test]
async fn test_failure_keeps_count_and_restores() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Fail);
    let user = UserId::from("7");
    for _ in 0..4 {
        controller.quota().increment(&user).unwrap();
    }

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit(user.clone(), &input, "").unwrap().wait().await;

    match &outcome.kind {
        OutcomeKind::Failed(detail) => {
            assert!(detail.starts_with("apktool failed"));
            assert_eq!(detail.chars().count(), 200);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.quota().get_count(&user), 4);
    assert!(!input.exists());
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
    assert_eq!(fixture.output_files(), 0);
}

#[tokio::test]
async fn test_converter_panic_is_a_failure() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Panic);
    let user = UserId::from("7");

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit(user.clone(), &input, "").unwrap().wait().await;

    match &outcome.kind {
        OutcomeKind::Failed(detail) => assert!(detail.contains("segfault in native code")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.quota().get_count(&user), 0);
    assert!(!controller.is_active(&user));
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
}

#[tokio::test]
async fn test_cancel_discards_late_result() {
    let fixture = Fixture::new();
    let gate = Gate::default();
    let controller = fixture.controller(Behavior::Gated(gate.clone()));
    let user = UserId::from("7");

    let input = fixture.input(&controller, "7", 128);
    let mut handle = controller.submit(user.clone(), &input, "--obfuscate").unwrap();
    wait_for_progress(&mut handle, JobProgress::Converting).await;

    controller.cancel(&user).unwrap();
    let outcome = handle.wait().await;
    assert!(outcome.is_cancelled());
    assert!(outcome.message().contains("cancelled"));
    assert!(!controller.is_active(&user));
    assert!(!input.exists());

    // the converter finishes after the job is gone
    let opener = open_later(&gate);
    controller.shutdown().await;
    opener.join().unwrap();

    assert_eq!(fixture.output_files(), 0);
    assert!(controller.work_area().stale_snapshots().is_empty());
    assert_eq!(controller.quota().get_count(&user), 0);
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
}

#[test]
fn test_runtime_exit_after_cancel_restores_after_converter() {
    let fixture = Fixture::new();
    let gate = Gate::default();
    let controller = fixture.controller(Behavior::Gated(gate.clone()));
    let user = UserId::from("7");
    let input = fixture.input(&controller, "7", 128);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let outcome = runtime.block_on(async {
        let mut handle = controller.submit(user.clone(), &input, "").unwrap();
        wait_for_progress(&mut handle, JobProgress::Converting).await;
        controller.cancel(&user).unwrap();
        handle.wait().await
    });
    assert!(outcome.is_cancelled());

    // the process exits while the converter is still writing
    let opener = open_later(&gate);
    drop(runtime);
    opener.join().unwrap();

    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
    assert_eq!(fixture.output_files(), 0);
    assert!(controller.work_area().stale_snapshots().is_empty());
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let fixture = Fixture::new();
    let gate = Gate::default();
    let controller = fixture.controller(Behavior::Gated(gate.clone()));

    let first_input = fixture.input(&controller, "1", 128);
    let mut first = controller.submit("1", &first_input, "").unwrap();
    wait_for_progress(&mut first, JobProgress::Converting).await;

    // a second user waits for the work area
    let second_input = fixture.input(&controller, "2", 128);
    let second = controller.submit("2", &second_input, "").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.status(), JobStatus::Pending(JobProgress::Queued));

    controller.cancel(&UserId::from("2")).unwrap();
    let outcome = second.wait().await;
    assert!(outcome.is_cancelled());
    assert!(!second_input.exists());

    gate.open();
    assert!(first.wait().await.is_success());
    assert_eq!(controller.quota().get_count(&UserId::from("1")), 1);
    assert_eq!(controller.quota().get_count(&UserId::from("2")), 0);
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
}

#[tokio::test]
async fn test_cancel_without_job() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    assert!(matches!(
        controller.cancel(&UserId::from("nobody")),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    let user = UserId::from("7");

    let wrong_ext = fixture.config.paths.downloads.join("notes.zip");
    fs::write(&wrong_ext, b"PK").unwrap();
    assert!(matches!(
        controller.submit(user.clone(), &wrong_ext, ""),
        Err(Error::InvalidInput(_))
    ));

    // one byte over the limit; sparse, so nothing is really written
    let too_big = fixture.input(&controller, "7", 4);
    fs::OpenOptions::new()
        .write(true)
        .open(&too_big)
        .unwrap()
        .set_len(100 * 1024 * 1024 + 1)
        .unwrap();
    match controller.submit(user.clone(), &too_big, "") {
        Err(Error::InvalidInput(message)) => assert!(message.contains("100MB")),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("oversized input was admitted"),
    }

    let missing = fixture.config.paths.downloads.join("missing.apk");
    assert!(matches!(
        controller.submit(user.clone(), &missing, ""),
        Err(Error::InvalidInput(_))
    ));

    let input = fixture.input(&controller, "7", 128);
    assert!(matches!(
        controller.submit(user.clone(), &input, "--custom-loader 9bad;rm"),
        Err(Error::InvalidInput(_))
    ));

    assert_eq!(controller.active_count(), 0);
    assert_eq!(controller.quota().get_count(&user), 0);
}

#[tokio::test]
async fn test_missing_work_area_fails_job() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);
    fs::remove_dir_all(&fixture.config.paths.work_dir).unwrap();

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit("7", &input, "").unwrap().wait().await;
    match &outcome.kind {
        OutcomeKind::Failed(detail) => assert!(detail.contains("backup failed")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!input.exists());
    assert_eq!(controller.quota().get_count(&UserId::from("7")), 0);
}

#[tokio::test]
async fn test_restore_failure_is_a_warning() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::DropSnapshots);
    let user = UserId::from("7");

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit(user.clone(), &input, "").unwrap().wait().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("restore failed"));
    assert!(outcome.message().contains("⚠️"));
    assert_eq!(controller.quota().get_count(&user), 1);
    assert!(!controller.is_active(&user));
}

#[tokio::test]
async fn test_unsaved_count_is_a_warning() {
    let fixture = Fixture::new();
    // a directory where the counter file should be: loads empty, never saves
    fs::create_dir_all(&fixture.config.paths.quota_file).unwrap();
    let controller = fixture.controller(Behavior::Succeed);
    let user = UserId::from("7");

    let input = fixture.input(&controller, "7", 128);
    let outcome = controller.submit(user.clone(), &input, "").unwrap().wait().await;

    match &outcome.kind {
        OutcomeKind::Succeeded { count, .. } => assert_eq!(*count, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("Conversion count was not saved"));
    assert_eq!(controller.quota().get_count(&user), 1);
    assert_eq!(fixture.work_tree(), Fixture::pristine_tree());
}

#[tokio::test]
async fn test_user_can_resubmit_after_outcome() {
    let fixture = Fixture::new();
    let controller = fixture.controller(Behavior::Succeed);

    for expected in 1..=2 {
        let input = fixture.input(&controller, "7", 128);
        let outcome = controller.submit("7", &input, "").unwrap().wait().await;
        match outcome.kind {
            OutcomeKind::Succeeded { count, .. } => assert_eq!(count, expected),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
