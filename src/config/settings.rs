//! Persisted local settings
//!
//! The watch root lives in a small JSON file under the platform config
//! directory. The first run asks for it on stdin and saves the answer.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

const APP_DIR: &str = "lesson-ingest";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default)]
    pub watch_root: Option<PathBuf>,
}

/// Where settings are stored when no explicit path is configured
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
}

impl LocalSettings {
    /// Missing file reads as empty settings
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings file {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Saved settings");
        Ok(())
    }
}

/// Ask for the watch root on the given streams
pub fn prompt_watch_root(input: &mut impl BufRead, output: &mut impl Write) -> Result<PathBuf> {
    write!(output, "Folder to watch for lesson materials: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read watch root")?;
    let answer = line.trim().trim_matches('"');
    if answer.is_empty() {
        bail!("No watch root given");
    }
    Ok(PathBuf::from(answer))
}

/// Pick the watch root: CLI flag, then `WATCH_ROOT`, then the settings file,
/// then a prompt. A CLI flag or a prompt answer is persisted.
pub fn resolve_watch_root(
    cli_root: Option<PathBuf>,
    env_root: Option<PathBuf>,
    settings_path: &Path,
) -> Result<PathBuf> {
    let mut settings = LocalSettings::load(settings_path)?;

    if let Some(root) = cli_root {
        settings.watch_root = Some(root.clone());
        settings.save(settings_path)?;
        return Ok(root);
    }
    if let Some(root) = env_root {
        return Ok(root);
    }
    if let Some(root) = settings.watch_root.clone() {
        return Ok(root);
    }

    let stdin = io::stdin();
    let root = prompt_watch_root(&mut stdin.lock(), &mut io::stdout())?;
    settings.watch_root = Some(root.clone());
    settings.save(settings_path)?;
    Ok(root)
}

/// The watch root must be an existing, readable directory
pub fn validate_watch_root(root: &Path) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Watch root {} is not accessible", root.display()))?;
    if !root.is_dir() {
        bail!("Watch root {} is not a directory", root.display());
    }
    std::fs::read_dir(&root)
        .with_context(|| format!("Watch root {} is not readable", root.display()))?;
    Ok(root)
}
