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

//! Dependency Builder (spec §4.7)
//!
//! Walks a loaded [`VersionRecord`] and emits the full queue of artifacts:
//! Java runtime, client archive, asset index + objects, libraries +
//! natives, log config. Also renders the raw (unsubstituted) argument
//! token lists the `launch` module turns into a command line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::artifact::{Artifact, ArtifactOverrides};
use crate::core::folder::MinecraftLocation;
use crate::core::platform::PlatformInfo;
use crate::core::pool::ArtifactSink;
use crate::core::resolver;
use crate::core::rule::{evaluate, Rule};
use crate::core::version::VersionRecord;
use crate::deps::java::JavaProvider;
use crate::error::{EngineError, EngineResult};

/// Default JVM argument template used when a version omits
/// `arguments.jvm` (legacy schema, spec §4.7).
fn default_jvm_arguments() -> Vec<String> {
    vec![
        "-Djava.library.path=${natives_directory}".to_string(),
        "-cp".to_string(),
        "${classpath}".to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct AssetIndexSummary {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub path: PathBuf,
    pub argument: String,
}

/// Everything the Dependency Builder resolved for one version, consumed by
/// the launch plan assembler.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub java_path: PathBuf,
    pub client_path: PathBuf,
    pub asset_index: AssetIndexSummary,
    pub library_paths: Vec<PathBuf>,
    pub natives_dir: PathBuf,
    pub jvm_args: Vec<String>,
    pub game_args: Vec<String>,
    pub main_class: String,
    pub log_config: Option<LogConfig>,
}

/// `features` gates rule-filtered arguments/libraries (e.g. vanilla's
/// demo-mode entries via `is_demo_user`) and must already reflect the
/// launch's identity by the time `build` runs — callers should compute it
/// with `launch::derive_features` before constructing this builder, not
/// derive it afterwards from the launch plan.
pub struct DependencyBuilder<'a> {
    pub location: &'a MinecraftLocation,
    pub platform: &'a PlatformInfo,
    pub features: &'a HashMap<String, bool>,
}

impl<'a> DependencyBuilder<'a> {
    pub fn new(
        location: &'a MinecraftLocation,
        platform: &'a PlatformInfo,
        features: &'a HashMap<String, bool>,
    ) -> Self {
        Self {
            location,
            platform,
            features,
        }
    }

    /// Resolves the client jar, java runtime, and log config synchronously;
    /// enqueues asset objects and libraries/natives into `sink`.
    pub async fn build(
        &self,
        version: &VersionRecord,
        sink: &dyn ArtifactSink,
    ) -> EngineResult<BuildOutcome> {
        let java_provider = JavaProvider::new(self.location.clone());
        let java_path = java_provider.ensure(version.java_major_version()).await?;

        let client_artifact = self.client_artifact(version)?;
        let client_path = resolver::resolve(&client_artifact, true).await?;

        let (asset_index_path, assets_id) = self.resolve_asset_index(version, sink).await?;

        let natives_dir = self.location.natives_root(&version.id);
        let library_paths = self.enqueue_libraries(version, &natives_dir, sink)?;

        let log_config = self.resolve_log_config(version).await?;
        let (jvm_args, game_args) = self.render_arguments(version);

        Ok(BuildOutcome {
            java_path,
            client_path,
            asset_index: AssetIndexSummary {
                id: assets_id,
                path: asset_index_path,
            },
            library_paths,
            natives_dir,
            jvm_args,
            game_args,
            main_class: version.main_class.clone(),
            log_config,
        })
    }

    fn client_artifact(&self, version: &VersionRecord) -> EngineResult<Artifact> {
        let client = version
            .downloads
            .as_ref()
            .and_then(|d| d.get("client"))
            .ok_or(EngineError::MissingField("downloads.client"))?;
        let overrides = ArtifactOverrides {
            target_file: Some(PathBuf::from(format!("{0}/{0}.jar", version.id))),
            ..Default::default()
        };
        Ok(Artifact::from_raw(client, self.location.versions.clone(), overrides))
    }

    /// Synchronously resolves `assetIndex`, requires `assetIndex.id ==
    /// assets`, then enqueues one artifact per asset object.
    async fn resolve_asset_index(
        &self,
        version: &VersionRecord,
        sink: &dyn ArtifactSink,
    ) -> EngineResult<(PathBuf, String)> {
        let assets_id = version.assets.clone().unwrap_or_else(|| "legacy".to_string());
        let descriptor = version
            .asset_index
            .as_ref()
            .ok_or(EngineError::MissingField("assetIndex"))?;
        if descriptor.get("id").and_then(Value::as_str) != Some(assets_id.as_str()) {
            return Err(EngineError::MissingField("assetIndex.id"));
        }

        let overrides = ArtifactOverrides {
            target_file: Some(PathBuf::from(format!("{assets_id}.json"))),
            ..Default::default()
        };
        let artifact = Artifact::from_raw(descriptor, self.location.assets.join("indexes"), overrides);
        let path = resolver::resolve(&artifact, true).await?;

        let raw = tokio::fs::read_to_string(&path).await?;
        let index: Value = serde_json::from_str(&raw)?;
        if let Some(objects) = index.get("objects").and_then(Value::as_object) {
            for (name, meta) in objects {
                let Some(hash) = meta.get("hash").and_then(Value::as_str) else {
                    continue;
                };
                let size = meta.get("size").and_then(Value::as_u64).unwrap_or(0);
                let url = format!(
                    "https://resources.download.minecraft.net/{}/{}",
                    &hash[0..2],
                    hash
                );
                let raw_descriptor = serde_json::json!({ "url": url, "sha1": hash, "size": size });
                let overrides = ArtifactOverrides {
                    target_file: Some(PathBuf::from(format!("{}/{}", &hash[0..2], hash))),
                    copy_to: Some(self.location.asset_virtual_legacy(name)),
                    ..Default::default()
                };
                let artifact = Artifact::from_raw(
                    &raw_descriptor,
                    self.location.assets.join("objects"),
                    overrides,
                );
                sink.enqueue(artifact);
            }
        }
        Ok((path, assets_id))
    }

    /// For each library: rule-filter, enqueue the main artifact, and
    /// enqueue the matching native classifier (if any) to unpack into
    /// `natives_dir`.
    fn enqueue_libraries(
        &self,
        version: &VersionRecord,
        natives_dir: &Path,
        sink: &dyn ArtifactSink,
    ) -> EngineResult<Vec<PathBuf>> {
        let mut library_paths = Vec::new();

        for entry in &version.libraries {
            if let Some(rules) = entry.get("rules").and_then(Value::as_array) {
                let rules: Vec<Rule> = rules.iter().filter_map(Rule::from_value).collect();
                if !evaluate(&rules, self.features, self.platform) {
                    continue;
                }
            }
            if entry.get("clientreq").and_then(Value::as_bool) == Some(false) {
                continue;
            }

            let main_descriptor = entry
                .get("downloads")
                .and_then(|d| d.get("artifact"))
                .or_else(|| entry.get("artifact"))
                .unwrap_or(entry);
            let main_artifact = Artifact::from_raw(
                main_descriptor,
                self.location.libraries.clone(),
                ArtifactOverrides::default(),
            );
            if let Some(dest) = main_artifact.destination() {
                library_paths.push(dest);
            }
            sink.enqueue(main_artifact);

            let Some(classifier) = entry
                .get("natives")
                .and_then(|n| n.get(self.platform.name))
                .and_then(Value::as_str)
            else {
                continue;
            };

            let native_descriptor = entry
                .get("downloads")
                .and_then(|d| d.get("classifiers"))
                .and_then(|c| c.get(classifier))
                .or_else(|| entry.get("classifiers").and_then(|c| c.get(classifier)));
            let Some(native_descriptor) = native_descriptor else {
                continue;
            };

            let exclude_prefixes = entry
                .get("extract")
                .and_then(|e| e.get("exclude"))
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let overrides = ArtifactOverrides {
                unpack_into: Some(natives_dir.to_path_buf()),
                exclude_prefixes,
                ..Default::default()
            };
            let native_artifact =
                Artifact::from_raw(native_descriptor, self.location.libraries.clone(), overrides);
            sink.enqueue(native_artifact);
        }
        Ok(library_paths)
    }

    /// Resolves `logging.client.file` with checksum verification disabled
    /// (the file is subsequently rewritten) and formats its JVM argument.
    async fn resolve_log_config(&self, version: &VersionRecord) -> EngineResult<Option<LogConfig>> {
        let Some(logging) = &version.logging else {
            return Ok(None);
        };
        let Some(client) = logging.get("client") else {
            return Ok(None);
        };
        let Some(file) = client.get("file") else {
            return Ok(None);
        };
        let file_id = file
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let argument_template = client
            .get("argument")
            .and_then(Value::as_str)
            .unwrap_or("-Dlog4j.configurationFile=${path}")
            .to_string();

        let overrides = ArtifactOverrides {
            target_file: Some(PathBuf::from(&file_id)),
            ..Default::default()
        };
        let artifact = Artifact::from_raw(file, self.location.assets.join("log_configs"), overrides);
        let path = resolver::resolve(&artifact, false).await?;
        let argument = argument_template.replace("${path}", &path.to_string_lossy());
        Ok(Some(LogConfig { path, argument }))
    }

    fn render_arguments(&self, version: &VersionRecord) -> (Vec<String>, Vec<String>) {
        let jvm_args = version
            .arguments
            .as_ref()
            .and_then(|a| a.get("jvm"))
            .and_then(Value::as_array)
            .map(|list| self.render_argument_list(list))
            .unwrap_or_else(default_jvm_arguments);

        let game_args = version
            .arguments
            .as_ref()
            .and_then(|a| a.get("game"))
            .and_then(Value::as_array)
            .map(|list| self.render_argument_list(list))
            .unwrap_or_else(|| {
                version
                    .minecraft_arguments
                    .as_deref()
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default()
            });

        (jvm_args, game_args)
    }

    /// Each element is a literal string, or an object with `value`/`values`
    /// and optional `rules`; objects whose rules evaluate false are skipped.
    fn render_argument_list(&self, elements: &[Value]) -> Vec<String> {
        let mut result = Vec::new();
        for element in elements {
            if let Some(s) = element.as_str() {
                result.push(s.to_string());
                continue;
            }
            let Some(object) = element.as_object() else {
                continue;
            };
            if let Some(rules) = object.get("rules").and_then(Value::as_array) {
                let rules: Vec<Rule> = rules.iter().filter_map(Rule::from_value).collect();
                if !evaluate(&rules, self.features, self.platform) {
                    continue;
                }
            }
            match object.get("value") {
                Some(Value::String(s)) => result.push(s.clone()),
                Some(Value::Array(values)) => {
                    for value in values {
                        if let Some(s) = value.as_str() {
                            result.push(s.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platform() -> PlatformInfo {
        PlatformInfo {
            name: "linux",
            arch: "x64",
            version: "6.1.0".to_string(),
        }
    }

    #[test]
    fn default_jvm_arguments_used_when_arguments_jvm_absent() {
        let features = HashMap::new();
        let location = MinecraftLocation::new(".minecraft");
        let platform = platform();
        let builder = DependencyBuilder::new(&location, &platform, &features);
        let version: VersionRecord = serde_json::from_value(json!({
            "id": "1.7.10",
            "minecraftArguments": "--username ${auth_player_name} --version ${version_name}",
        }))
        .unwrap();
        let (jvm_args, game_args) = builder.render_arguments(&version);
        assert_eq!(jvm_args, default_jvm_arguments());
        assert_eq!(
            game_args,
            vec!["--username", "${auth_player_name}", "--version", "${version_name}"]
        );
    }

    #[test]
    fn argument_objects_filtered_by_rules() {
        let mut features = HashMap::new();
        features.insert("has_custom_resolution".to_string(), false);
        let location = MinecraftLocation::new(".minecraft");
        let platform = platform();
        let builder = DependencyBuilder::new(&location, &platform, &features);
        let version: VersionRecord = serde_json::from_value(json!({
            "id": "1.19.4",
            "mainClass": "net.minecraft.client.main.Main",
            "arguments": {
                "game": [
                    "--username", "${auth_player_name}",
                    {
                        "rules": [{"action": "allow", "features": {"has_custom_resolution": true}}],
                        "value": ["--width", "${resolution_width}"],
                    },
                ],
            },
        }))
        .unwrap();
        let (_, game_args) = builder.render_arguments(&version);
        assert_eq!(game_args, vec!["--username", "${auth_player_name}"]);
    }

    #[test]
    fn library_rules_skip_disallowed_platform() {
        let features = HashMap::new();
        let location = MinecraftLocation::new(".minecraft");
        let platform = platform();
        let builder = DependencyBuilder::new(&location, &platform, &features);
        let version: VersionRecord = serde_json::from_value(json!({
            "id": "1.19.4",
            "mainClass": "net.minecraft.client.main.Main",
            "libraries": [
                {
                    "name": "org.lwjgl:lwjgl:3.3.1",
                    "rules": [{"action": "allow", "os": {"name": "osx"}}],
                },
            ],
        }))
        .unwrap();

        struct CountingSink(std::cell::Cell<usize>);
        impl ArtifactSink for CountingSink {
            fn enqueue(&self, _artifact: Artifact) {
                self.0.set(self.0.get() + 1);
            }
        }
        let sink = CountingSink(std::cell::Cell::new(0));
        let natives_dir = location.natives_root(&version.id);
        builder.enqueue_libraries(&version, &natives_dir, &sink).unwrap();
        assert_eq!(sink.0.get(), 0);
    }
}
