/*
 * Dependency Materialization Engine
 * Copyright (C) 2023 Broken-Deer <old_driver__@outlook.com> and contributors
 *
 * This program is free software, you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Persisted Engine configuration (ambient addition; SPEC_FULL.md §6).
//!
//! Mirrors `examples/original_source/src/mml/config_manager.py`'s priority
//! chain (explicit override → file → built-in default), without
//! reimplementing CLI argument parsing, which stays the caller's job.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::platform;
use crate::core::pool::DEFAULT_WORKERS;
use crate::error::EngineResult;

/// On-disk, overridable Engine tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub game_dir: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub launcher_name: Option<String>,
    pub launcher_version: Option<String>,
    pub version_manifest_url: Option<String>,
    pub java_runtime_manifest_url: Option<String>,
}

impl EngineConfig {
    /// Loads a TOML config file, falling back to `EngineConfig::default()`
    /// when the file is absent. A present-but-unparsable file is an error
    /// (the config_manager.py original logs and silently falls back, but
    /// the Engine's own config is internal-only — a caller that supplies a
    /// corrupt file wants to know, not silently lose its overrides).
    pub async fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            log::warn!("config file {} doesn't exist, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&raw)?)
    }

    pub async fn save(&self, path: &Path) -> EngineResult<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|err| crate::error::EngineError::InvalidConfig(err.to_string()))?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    /// Per-OS default `.minecraft` directory.
    pub fn default_game_dir() -> EngineResult<PathBuf> {
        let home = dirs_home()?;
        Ok(match platform::os_name()? {
            "windows" => PathBuf::from(std::env::var("APPDATA").unwrap_or_default()).join(".minecraft"),
            "osx" => home.join("Library").join("Application Support").join(".minecraft"),
            _ => home.join(".minecraft"),
        })
    }

    /// Priority: explicit override -> config file -> built-in default.
    pub fn game_dir(&self, explicit: Option<PathBuf>) -> EngineResult<PathBuf> {
        if let Some(explicit) = explicit {
            return Ok(explicit);
        }
        if let Some(from_file) = &self.game_dir {
            return Ok(from_file.clone());
        }
        Self::default_game_dir()
    }

    pub fn worker_count(&self, explicit: Option<usize>) -> usize {
        explicit.or(self.worker_count).unwrap_or(DEFAULT_WORKERS)
    }
}

fn dirs_home() -> EngineResult<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map_err(|_| crate::error::EngineError::UnsupportedPlatform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_default_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = EngineConfig::load(&path).await.unwrap();
        assert!(config.game_dir.is_none());
    }

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = EngineConfig::default();
        config.worker_count = Some(8);
        config.launcher_name = Some("test-launcher".to_string());
        config.save(&path).await.unwrap();

        let loaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(loaded.worker_count, Some(8));
        assert_eq!(loaded.launcher_name.as_deref(), Some("test-launcher"));
    }

    #[test]
    fn explicit_override_wins_over_file_value() {
        let mut config = EngineConfig::default();
        config.worker_count = Some(2);
        assert_eq!(config.worker_count(Some(16)), 16);
        assert_eq!(config.worker_count(None), 2);
    }

    #[test]
    fn falls_back_to_default_worker_count_when_unset() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count(None), DEFAULT_WORKERS);
    }
}
