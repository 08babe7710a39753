//! dccbot status command - checks directories, tools and `dcc.cfg`

use dcc_foundation::{BotConfig, ToolchainConfig};
use std::fmt;
use std::path::{Path, PathBuf};

const APKTOOL_CANDIDATES: [&str; 3] = ["apktool.jar", "apktool", "apktool.bat"];
const NDK_BUILD_CANDIDATES: [&str; 2] = ["ndk-build", "ndk-build.cmd"];
const APKSIGNER: &str = "apksigner.jar";

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub ok: bool,
}

impl Check {
    fn new(name: impl Into<String>, ok: bool) -> Self {
        Self {
            name: name.into(),
            ok,
        }
    }
}

/// Readiness of a service root
#[derive(Debug)]
pub struct StatusReport {
    pub directories: Vec<Check>,
    pub tools: Vec<Check>,
    /// `None` when `dcc.cfg` is missing or unreadable
    pub toolchain: Option<ToolchainConfig>,
}

impl StatusReport {
    /// `config` must be resolved against the service root
    pub fn collect(config: &BotConfig) -> Self {
        let paths = &config.paths;
        let project_dir = paths.work_dir.parent().unwrap_or(&paths.work_dir);

        let directories = [
            (".tmp", paths.tmp.as_path()),
            ("downloads", paths.downloads.as_path()),
            ("output", paths.output.as_path()),
            ("project", project_dir),
            ("tools", paths.tools.as_path()),
        ]
        .into_iter()
        .map(|(name, dir)| Check::new(name, dir.is_dir()))
        .collect();

        let tool_dir = &config.converter.working_dir;
        let toolchain = ToolchainConfig::load(tool_dir).ok().flatten();

        let apktool = APKTOOL_CANDIDATES
            .iter()
            .any(|name| paths.tools.join(name).exists());
        let ndk = find_ndk_build(tool_dir, toolchain.as_ref()).is_some();
        let signer = paths.tools.join(APKSIGNER).exists();
        let converter = which::which(&config.converter.program).is_ok();

        Self {
            directories,
            tools: vec![
                Check::new("Apktool", apktool),
                Check::new("Android NDK", ndk),
                Check::new("APK Signer", signer),
                Check::new(format!("Converter ({})", config.converter.program), converter),
            ],
            toolchain,
        }
    }

    /// All required tools are present
    pub fn is_ready(&self) -> bool {
        self.tools.iter().all(|c| c.ok)
    }
}

/// `ndk-build` in the tool directory, the configured NDK, or on `PATH`
fn find_ndk_build(tool_dir: &Path, toolchain: Option<&ToolchainConfig>) -> Option<PathBuf> {
    let mut dirs = vec![tool_dir.to_path_buf()];
    if let Some(ndk) = toolchain.filter(|t| t.has_ndk()) {
        dirs.push(PathBuf::from(&ndk.ndk_dir));
    }

    dirs.iter()
        .flat_map(|dir| NDK_BUILD_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which("ndk-build").ok())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "🔍 System Status\n")?;

        writeln!(f, "📁 Directories:")?;
        for check in &self.directories {
            writeln!(f, "• {}: {}", check.name, mark(check.ok))?;
        }

        writeln!(f, "\n🛠️ Tools:")?;
        for check in &self.tools {
            writeln!(f, "• {}: {}", check.name, mark(check.ok))?;
        }

        writeln!(f, "\n⚙️ Configuration:")?;
        match &self.toolchain {
            Some(toolchain) => {
                writeln!(f, "• NDK Dir: {}", mark(toolchain.has_ndk()))?;
                writeln!(f, "• Signing: {}", mark(toolchain.has_signing()))?;
            }
            None => writeln!(f, "• dcc.cfg: ❌")?,
        }

        let overall = if self.is_ready() {
            "✅ READY"
        } else {
            "❌ NOT READY"
        };
        write!(f, "\n📊 Overall Status: {}", overall)
    }
}

pub fn show_status(config: &BotConfig) -> anyhow::Result<()> {
    println!("{}", StatusReport::collect(config));
    Ok(())
}
