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

//! Java runtime discovery and provisioning (spec §4.7 "Java" bullet).
//!
//! Scans the local `jdk/` subtree for an executable whose reported major
//! version matches; if none is found, downloads a matching runtime from
//! Mojang's published runtime manifest and re-scans.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use crate::core::artifact::{Artifact, ArtifactOverrides};
use crate::core::folder::MinecraftLocation;
use crate::core::platform;
use crate::core::resolver;
use crate::error::{EngineError, EngineResult};

/// Default `javaVersion.majorVersion` when a version record omits it
/// (spec §3).
pub const DEFAULT_JAVA_MAJOR_VERSION: i32 = 8;

const JAVA_RUNTIME_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/v1/products/java-runtime/2ec0cc96c44e5a76b9c8b7c39df7210883d12871/all.json";

/// Finds or installs a Java runtime under `game_dir/jdk/` and returns the
/// path to its `java` executable.
pub struct JavaProvider {
    location: MinecraftLocation,
    http: reqwest::Client,
}

impl JavaProvider {
    pub fn new(location: MinecraftLocation) -> Self {
        Self {
            location,
            http: reqwest::Client::new(),
        }
    }

    /// `jdk_check_install(major_version)` — returns the java executable
    /// path, downloading+installing a matching runtime on first miss.
    pub async fn ensure(&self, major_version: i32) -> EngineResult<PathBuf> {
        if let Some(found) = self.scan(major_version).await? {
            return Ok(found);
        }

        log::warn!("installing java runtime major version {major_version}");
        self.install(major_version).await?;

        self.scan(major_version).await?.ok_or_else(|| {
            EngineError::JavaUnavailable(format!(
                "no java {major_version} runtime available after install"
            ))
        })
    }

    async fn scan(&self, major_version: i32) -> EngineResult<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.location.jdk).await?;
        let mut entries = match tokio::fs::read_dir(&self.location.jdk).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let java_bin = entry.path().join("bin").join(java_executable_name());
            if !java_bin.exists() {
                continue;
            }
            if probe_major_version(&java_bin).await? == Some(major_version) {
                log::info!("found java {major_version} at {}", java_bin.display());
                return Ok(Some(java_bin));
            }
        }
        Ok(None)
    }

    async fn install(&self, major_version: i32) -> EngineResult<()> {
        let component = component_for(major_version);
        let platform_key = platform_key()?;

        let manifest: Value = self
            .http
            .get(JAVA_RUNTIME_MANIFEST_URL)
            .send()
            .await?
            .json()
            .await?;

        let entry = manifest
            .get(platform_key)
            .and_then(|p| p.get(component))
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .ok_or_else(|| {
                EngineError::JavaUnavailable(format!(
                    "no `{component}` runtime published for `{platform_key}`"
                ))
            })?;

        let manifest_url = entry
            .get("manifest")
            .and_then(|m| m.get("url"))
            .and_then(Value::as_str)
            .ok_or(EngineError::MissingField("manifest.url"))?;

        let files_manifest: Value = self.http.get(manifest_url).send().await?.json().await?;
        let files = files_manifest
            .get("files")
            .and_then(Value::as_object)
            .ok_or(EngineError::MissingField("files"))?;

        let component_root = self.location.jdk.join(component);
        for (relative, meta) in files {
            if meta.get("type").and_then(Value::as_str).unwrap_or("file") != "file" {
                continue;
            }
            let Some(download) = meta.get("downloads").and_then(|d| d.get("raw")) else {
                continue;
            };

            let overrides = ArtifactOverrides {
                target_file: Some(PathBuf::from(relative)),
                ..Default::default()
            };
            let artifact = Artifact::from_raw(download, component_root.clone(), overrides);
            resolver::resolve(&artifact, true).await?;

            #[cfg(unix)]
            if meta.get("executable").and_then(Value::as_bool).unwrap_or(false) {
                use std::os::unix::fs::PermissionsExt;
                let dest = component_root.join(relative);
                let mut perms = tokio::fs::metadata(&dest).await?.permissions();
                perms.set_mode(0o755);
                tokio::fs::set_permissions(&dest, perms).await?;
            }
        }
        Ok(())
    }
}

/// `jre-legacy` (8), `java-runtime-alpha` (9-16), `java-runtime-gamma`
/// (17+) — Mojang's published component names.
fn component_for(major_version: i32) -> &'static str {
    if major_version <= 8 {
        "jre-legacy"
    } else if major_version <= 16 {
        "java-runtime-alpha"
    } else {
        "java-runtime-gamma"
    }
}

fn platform_key() -> EngineResult<&'static str> {
    let name = platform::os_name()?;
    let arch = platform::arch();
    Ok(match (name, arch) {
        ("windows", "x64") => "windows-x64",
        ("windows", "x86") => "windows-x86",
        ("windows", "aarch64") => "windows-arm64",
        ("osx", "aarch64") => "mac-os-arm64",
        ("osx", _) => "mac-os",
        ("linux", "x86") => "linux-i386",
        _ => "linux",
    })
}

fn java_executable_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "java.exe"
    } else {
        "java"
    }
}

async fn probe_major_version(java_bin: &Path) -> EngineResult<Option<i32>> {
    let output = tokio::process::Command::new(java_bin)
        .arg("-version")
        .output()
        .await?;
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(parse_major_version(&combined))
}

/// Parses `java -version`'s output (`java version "1.8.0_372"` or
/// `openjdk version "17.0.2"`) into a major version number.
fn parse_major_version(text: &str) -> Option<i32> {
    let pattern = Regex::new(r"[0-9]+\.[0-9]+\.[0-9A-Za-z_.+-]+").ok()?;
    for word in text.split_whitespace() {
        let word = word.trim_matches('"');
        let Some(found) = pattern.find(word) else {
            continue;
        };
        let matched = found.as_str();
        if matched.starts_with("1.8") {
            return Some(8);
        }
        return matched.split('.').next()?.parse::<i32>().ok();
    }
    None
}
