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

//! Version Graph Resolver
//!
//! Enumerates local + remote version descriptors, resolves inheritance
//! chains, and materializes a deep-merged [`VersionRecord`] (spec §4.6).

use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use crate::core::artifact::{Artifact, ArtifactOverrides};
use crate::core::folder::MinecraftLocation;
use crate::core::resolver;
use crate::error::{EngineError, EngineResult};

pub const VERSION_MANIFEST_URL: &str = "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
/// The Engine's own declared launcher version, compared against each
/// version's `minimumLauncherVersion` (spec §3).
pub const ENGINE_LAUNCHER_VERSION: i32 = 21;

#[derive(Debug, Clone)]
pub struct VersionSummary {
    pub id: String,
    pub version_type: String,
    pub release_time: String,
    pub url: Option<String>,
    pub sha1: Option<String>,
    pub local: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    id: String,
    r#type: String,
    url: String,
    #[serde(rename = "releaseTime")]
    release_time: String,
    sha1: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionManifest {
    versions: Vec<ManifestEntry>,
}

/// The fully-inherited, deep-merged descriptor for one playable version
/// (spec §3). Heterogeneous nested sections (`libraries`, `arguments`,
/// `downloads`, `logging`) are kept as raw JSON and interpreted by the
/// Dependency Builder, which already tolerates the modern/legacy schema
/// split at that level.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: Option<String>,
    pub release_time: Option<String>,
    #[serde(default)]
    pub minimum_launcher_version: i32,
    pub assets: Option<String>,
    pub asset_index: Option<Value>,
    pub downloads: Option<Value>,
    #[serde(default)]
    pub libraries: Vec<Value>,
    pub arguments: Option<Value>,
    pub minecraft_arguments: Option<String>,
    #[serde(default = "default_main_class")]
    pub main_class: String,
    pub java_version: Option<Value>,
    pub logging: Option<Value>,
    pub inherits_from: Option<String>,
}

fn default_main_class() -> String {
    "net.minecraft.launchwrapper.Launch".to_string()
}

impl VersionRecord {
    pub fn java_major_version(&self) -> i32 {
        self.java_version
            .as_ref()
            .and_then(|v| v.get("majorVersion"))
            .and_then(Value::as_i64)
            .unwrap_or(8) as i32
    }
}

/// `deep-merge` rule (spec §4.6): for every key in the child, if the value
/// is a mapping, recurse; if a sequence, append (child extends parent);
/// otherwise overwrite.
pub fn deep_merge(parent: &Value, child: &Value) -> Value {
    match (parent, child) {
        (Value::Object(parent_map), Value::Object(child_map)) => {
            let mut merged = parent_map.clone();
            for (key, child_value) in child_map {
                let merged_value = match merged.get(key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => child_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (Value::Array(parent_list), Value::Array(child_list)) => {
            let mut merged = parent_list.clone();
            merged.extend(child_list.clone());
            Value::Array(merged)
        }
        (_, child_value) => child_value.clone(),
    }
}

pub struct VersionGraphResolver {
    location: MinecraftLocation,
    http: reqwest::Client,
}

impl VersionGraphResolver {
    pub fn new(location: MinecraftLocation) -> Self {
        Self {
            location,
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_manifest(&self) -> EngineResult<VersionManifest> {
        let response = self.http.get(VERSION_MANIFEST_URL).send().await?;
        Ok(response.json::<VersionManifest>().await?)
    }

    /// `list_versions() -> [VersionSummary]`.
    pub async fn list_versions(&self) -> EngineResult<Vec<VersionSummary>> {
        let mut result = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.location.versions).await {
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let id = entry.file_name().to_string_lossy().to_string();
                let json_path = self.location.version_json(&id);
                let Ok(raw) = tokio::fs::read_to_string(&json_path).await else {
                    continue;
                };
                let Ok(value) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                result.push(VersionSummary {
                    id,
                    version_type: value
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    release_time: value
                        .get("releaseTime")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: None,
                    sha1: None,
                    local: true,
                });
            }
        }

        // Version manifest fetch failures are non-fatal when local versions
        // alone suffice (spec §7).
        match self.fetch_manifest().await {
            Ok(manifest) => {
                for entry in manifest.versions {
                    if result.iter().any(|v| v.id == entry.id) {
                        continue;
                    }
                    result.push(VersionSummary {
                        id: entry.id,
                        version_type: entry.r#type,
                        release_time: entry.release_time,
                        url: Some(entry.url),
                        sha1: entry.sha1,
                        local: false,
                    });
                }
            }
            Err(err) => {
                log::warn!("version manifest fetch failed, continuing with local versions only: {err}");
            }
        }

        result.sort_by(|a, b| b.release_time.cmp(&a.release_time));
        Ok(result)
    }

    /// `path_for(version_id, download) -> path | None`.
    pub async fn path_for(&self, version_id: &str, download: bool) -> EngineResult<Option<PathBuf>> {
        let json_path = self.location.version_json(version_id);
        if json_path.exists() {
            return Ok(Some(json_path));
        }
        if !download {
            return Ok(None);
        }

        let manifest = self.fetch_manifest().await?;
        let entry = manifest
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .ok_or_else(|| EngineError::VersionNotFound(version_id.to_string()))?;

        let raw = serde_json::json!({ "url": entry.url, "sha1": entry.sha1 });
        let overrides = ArtifactOverrides {
            target_file: Some(PathBuf::from(format!("{version_id}/{version_id}.json"))),
            ..Default::default()
        };
        let artifact = Artifact::from_raw(&raw, self.location.versions.clone(), overrides);
        resolver::resolve(&artifact, true).await?;
        Ok(Some(json_path))
    }

    /// `load(version_id) -> VersionRecord | Err`.
    pub async fn load(&self, version_id: &str) -> EngineResult<VersionRecord> {
        let mut seen = Vec::new();
        let merged = self.load_merged_value(version_id, &mut seen).await?;
        let record: VersionRecord = serde_json::from_value(merged)?;
        if record.minimum_launcher_version > ENGINE_LAUNCHER_VERSION {
            return Err(EngineError::VersionRequiresNewerLauncher {
                id: record.id,
                required: record.minimum_launcher_version,
                declared: ENGINE_LAUNCHER_VERSION,
            });
        }
        Ok(record)
    }

    fn load_merged_value<'a>(
        &'a self,
        version_id: &'a str,
        seen: &'a mut Vec<String>,
    ) -> BoxFuture<'a, EngineResult<Value>> {
        Box::pin(async move {
            if seen.iter().any(|id| id == version_id) {
                return Err(EngineError::VersionNotFound(version_id.to_string()));
            }
            seen.push(version_id.to_string());

            let json_path = self.location.version_json(version_id);
            let raw = tokio::fs::read_to_string(&json_path)
                .await
                .map_err(|_| EngineError::VersionNotFound(version_id.to_string()))?;
            let own: Value = serde_json::from_str(&raw)?;

            if let Some(min) = own.get("minimumLauncherVersion").and_then(Value::as_i64) {
                if min as i32 > ENGINE_LAUNCHER_VERSION {
                    return Err(EngineError::VersionRequiresNewerLauncher {
                        id: version_id.to_string(),
                        required: min as i32,
                        declared: ENGINE_LAUNCHER_VERSION,
                    });
                }
            }

            match own.get("inheritsFrom").and_then(Value::as_str) {
                Some(parent_id) => {
                    let parent_id = parent_id.to_string();
                    let parent_merged = self.load_merged_value(&parent_id, seen).await?;
                    Ok(deep_merge(&parent_merged, &own))
                }
                None => Ok(own),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_version(dir: &std::path::Path, id: &str, body: Value) {
        let version_dir = dir.join("versions").join(id);
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join(format!("{id}.json")), body.to_string()).unwrap();
    }

    // S5: inheritance. Parent has libraries:[L1], child has inheritsFrom:
    // parent, libraries:[L2] -> merged record has libraries:[L1,L2].
    #[tokio::test]
    async fn s5_inheritance_merges_libraries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_version(
            dir.path(),
            "parent",
            json!({
                "id": "parent",
                "mainClass": "net.minecraft.client.main.Main",
                "libraries": [{"name": "L1"}],
            }),
        );
        write_version(
            dir.path(),
            "child",
            json!({
                "id": "child",
                "inheritsFrom": "parent",
                "libraries": [{"name": "L2"}],
            }),
        );

        let location = MinecraftLocation::new(dir.path().to_str().unwrap());
        let resolver = VersionGraphResolver::new(location);
        let record = resolver.load("child").await.unwrap();
        let names: Vec<&str> = record
            .libraries
            .iter()
            .map(|l| l["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["L1", "L2"]);
    }

    // Invariant 7: deep-merge is associative over sequences.
    #[test]
    fn deep_merge_extends_lists_in_order() {
        let a = json!({"libraries": ["A"]});
        let b = json!({"libraries": ["B"]});
        let c = json!({"libraries": ["C"]});
        let ab = deep_merge(&a, &b);
        let abc = deep_merge(&ab, &c);
        assert_eq!(abc["libraries"], json!(["A", "B", "C"]));
    }

    #[tokio::test]
    async fn rejects_version_requiring_newer_launcher() {
        let dir = tempfile::tempdir().unwrap();
        write_version(
            dir.path(),
            "future",
            json!({
                "id": "future",
                "minimumLauncherVersion": ENGINE_LAUNCHER_VERSION + 100,
                "mainClass": "net.minecraft.client.main.Main",
            }),
        );
        let location = MinecraftLocation::new(dir.path().to_str().unwrap());
        let resolver = VersionGraphResolver::new(location);
        let result = resolver.load("future").await;
        assert!(matches!(result, Err(EngineError::VersionRequiresNewerLauncher { .. })));
    }
}
