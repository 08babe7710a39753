//! dccbot init command
//!
//! Creates the service directory layout, the bot config and the converter's
//! `dcc.cfg`.

use dcc_foundation::{BotConfig, JsonStore, ToolchainConfig, BOT_CONFIG_FILE};
use std::fs;
use std::path::Path;

/// Initialize a service root. `config` is the unresolved config, as it will
/// be written to `.dccbot/config.json`.
pub fn init_project(root: &Path, config: &BotConfig, force: bool) -> anyhow::Result<()> {
    println!("Initializing dccbot in {}...", root.display());

    let resolved = config.clone().resolved(root);
    for dir in resolved.paths.required_dirs() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            println!("  Created {}", display_relative(root, dir));
        }
    }

    let store = JsonStore::project(root);
    if store.exists(BOT_CONFIG_FILE) && !force {
        println!("  Kept .dccbot/{} (use --force to overwrite)", BOT_CONFIG_FILE);
    } else {
        config.save(root)?;
        println!("  Wrote .dccbot/{}", BOT_CONFIG_FILE);
    }

    let tool_dir = &resolved.converter.working_dir;
    if ToolchainConfig::write_default_if_missing(tool_dir)? {
        println!("  Wrote default dcc.cfg");
    }

    println!("\n✓ dccbot initialized");
    println!("\nNext steps:");
    println!("  1. Put apktool.jar and apksigner.jar into {}", display_relative(root, &resolved.paths.tools));
    println!("  2. Set ndk_dir in dcc.cfg");
    println!("  3. Run 'dccbot status' to check the setup");

    Ok(())
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
