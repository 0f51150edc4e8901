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

//! Platform Probe
//!
//! Classifies the host as `linux`/`windows`/`osx`, and reports the
//! architecture and OS version string used by the Rule Evaluator's `os`
//! clause.

use crate::error::{EngineError, EngineResult};

/// `os_name()` — the three platform identifiers the Rule Evaluator matches
/// against. WSL reports `linux`, matching the compiled target exactly.
pub fn os_name() -> EngineResult<&'static str> {
    if cfg!(target_os = "windows") {
        Ok("windows")
    } else if cfg!(target_os = "linux") {
        Ok("linux")
    } else if cfg!(target_os = "macos") {
        Ok("osx")
    } else {
        Err(EngineError::UnsupportedPlatform)
    }
}

/// Lowercased machine architecture string.
pub fn arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "x86") {
        "x86"
    } else if cfg!(target_arch = "mips") {
        "mips"
    } else if cfg!(target_arch = "powerpc") {
        "powerpc"
    } else if cfg!(target_arch = "powerpc64") {
        "powerpc64"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else {
        "unknown"
    }
}

/// Windows product version, macOS product version, else kernel release,
/// lowercased.
pub async fn os_version() -> EngineResult<String> {
    let raw = if cfg!(target_os = "windows") {
        let output = tokio::process::Command::new("cmd")
            .args(["/C", "powershell -c [System.Environment]::OSVersion.Version"])
            .output()
            .await?;
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else if cfg!(target_os = "macos") {
        let output = tokio::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .await?;
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        let output = tokio::process::Command::new("uname")
            .arg("-r")
            .output()
            .await?;
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    };
    Ok(raw.to_lowercase())
}

/// Snapshot of the host platform, computed once and reused by the Rule
/// Evaluator and Dependency Builder.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub name: &'static str,
    pub arch: &'static str,
    pub version: String,
}

impl PlatformInfo {
    pub async fn probe() -> EngineResult<Self> {
        Ok(Self {
            name: os_name()?,
            arch: arch(),
            version: os_version().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_name_is_one_of_the_three() {
        let name = os_name().unwrap();
        assert!(["linux", "windows", "osx"].contains(&name));
    }

    #[tokio::test]
    async fn probe_succeeds_on_supported_hosts() {
        let info = PlatformInfo::probe().await.unwrap();
        assert!(!info.version.is_empty());
    }
}
