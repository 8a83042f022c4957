use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::waypoint_config::{CONFIG_FILE, WaypointToml};

/// Runtime configuration for a waypoint project.
///
/// Resolves the on-disk layout under `.waypoint/` and carries the parsed
/// `waypoint.toml` together with CLI-level flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub waypoint_dir: PathBuf,
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub outbox_file: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    toml: WaypointToml,
}

impl Config {
    /// Resolve the layout for `project_dir` and load `waypoint.toml` when present.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let waypoint_dir = project_dir.join(".waypoint");
        let toml = WaypointToml::load_or_default(&waypoint_dir)?;

        Ok(Self {
            config_file: waypoint_dir.join(CONFIG_FILE),
            state_file: waypoint_dir.join("state.json"),
            outbox_file: waypoint_dir.join("outbox.jsonl"),
            log_dir: waypoint_dir.join("logs"),
            waypoint_dir,
            project_dir,
            verbose,
            toml,
        })
    }

    pub fn toml(&self) -> &WaypointToml {
        &self.toml
    }

    /// `[project] name`, falling back to the project directory's name.
    pub fn project_name(&self) -> String {
        self.toml
            .project_name()
            .map(str::to_string)
            .or_else(|| {
                self.project_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "project".to_string())
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.waypoint_dir)
            .context("Failed to create .waypoint directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Write the starter `waypoint.toml`. Refuses to overwrite unless `force`.
    pub fn write_template(&self, force: bool) -> Result<&Path> {
        if self.config_file.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                self.config_file.display()
            );
        }
        self.ensure_directories()?;
        std::fs::write(&self.config_file, WaypointToml::template())
            .with_context(|| format!("Failed to write {}", self.config_file.display()))?;
        Ok(&self.config_file)
    }
}
