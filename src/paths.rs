//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Dev mode** (debug builds): `config.yaml` in the current directory.
//! - **Portable mode**: a `.portable` marker next to the executable keeps all
//!   data files in the executable's directory.
//! - **Installed mode** (default): data lives in `<data dir>/Scorebridge`
//!   (`%APPDATA%` on Windows, `~/.local/share` on Linux).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "Scorebridge";

/// Application paths for config, logs and logo files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Directory holding the derived logo files
    pub logos_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    fn in_dir(base: &Path, is_portable: bool) -> Self {
        Self {
            config: base.join("config.yaml"),
            logs_dir: base.join("logs"),
            logos_dir: base.join(crate::logos::LOGO_URL_DIR),
            is_portable,
        }
    }

    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!(
                    "[paths] Running in DEV mode (config.yaml found in cwd: {})",
                    cwd.display()
                );
                return Self::in_dir(&cwd, true);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::in_dir(&exe_dir, true);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: dirs::data_dir() returned None, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in INSTALLED mode (data dir: {})",
            app_data.display()
        );

        Self::in_dir(&app_data, false)
    }

    /// Paths for an explicit config file; logs and logos sit beside it
    pub fn for_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let base = config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config,
            ..Self::in_dir(&base, true)
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure all required directories exist.
    ///
    /// In installed mode, also copies `config.example.yaml` to the config
    /// location if the config file doesn't exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.logs_dir, &self.logos_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }

        if !self.is_portable {
            if let Some(config_parent) = self.config.parent() {
                std::fs::create_dir_all(config_parent).with_context(|| {
                    format!("Failed to create config directory {}", config_parent.display())
                })?;
            }
            if !self.config.exists() {
                self.copy_example_config()?;
            }
        }

        Ok(())
    }

    /// Seed the config file from `config.example.yaml`.
    ///
    /// Looks next to the executable, then in the current directory.
    fn copy_example_config(&self) -> anyhow::Result<()> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        for example in [
            exe_dir.join("config.example.yaml"),
            PathBuf::from("config.example.yaml"),
        ] {
            if example.exists() {
                info!("Copying example config to {}", self.config.display());
                std::fs::copy(&example, &self.config).with_context(|| {
                    format!(
                        "Failed to copy example config from {} to {}",
                        example.display(),
                        self.config.display()
                    )
                })?;
                return Ok(());
            }
        }

        info!("No config found, please create {}", self.config.display());
        Ok(())
    }
}
