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

//! Launch plan assembly (spec §4.7 "Launch plan assembly" / "Offline UUID"
//! / "Placeholder substitution").
//!
//! Turns a [`BuildOutcome`] plus caller context into a fully-substituted
//! `{command, env, cwd}` triple, ready to hand to a process supervisor the
//! Engine does not itself own.

use std::collections::HashMap;
use std::path::PathBuf;

use md5::{Digest, Md5};
use regex::{Captures, Regex};

use crate::core::folder::MinecraftLocation;
use crate::core::version::VersionRecord;
use crate::deps::builder::BuildOutcome;

/// `;` on Windows, `:` elsewhere.
pub fn classpath_separator() -> &'static str {
    if cfg!(target_os = "windows") {
        ";"
    } else {
        ":"
    }
}

/// Caller-supplied identity and overrides for one launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    /// Player name; `None` implies the `is_demo_user` feature. Callers must
    /// run [`derive_features`] on this same username *before* constructing
    /// the `DependencyBuilder`, so rule-gated arguments/libraries are
    /// filtered against the real flag rather than a stale features map.
    pub username: Option<String>,
    /// Explicit UUID; derived offline from `username` when absent.
    pub uuid: Option<String>,
    pub access_token: Option<String>,
    pub user_type: Option<String>,
    pub version_type_override: Option<String>,
    pub launcher_name: String,
    pub launcher_version: String,
    /// Overwrites any placeholder of the same name (spec §4.7).
    pub extra_env: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
}

/// Derives an offline UUID as `MD5("OfflinePlayer:<username>")` with the
/// version/variant bits patched (spec §4.7 / scenario S1).
pub fn offline_uuid(username: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("OfflinePlayer:{username}"));
    let mut bytes: [u8; 16] = hasher.finalize().into();
    bytes[6] = (bytes[6] & 0x0F) | 0x30;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derives the Rule Evaluator feature flags implied by this launch's
/// identity, merged over `base_features`. The result must feed
/// `DependencyBuilder::new`, not just `build_plan`: the Dependency Builder
/// renders rule-gated arguments and filters rule-gated libraries (spec.md
/// Glossary: "Feature") using whatever features map it is constructed
/// with, and it runs before `build_plan` ever sees a username. Mirrors
/// `examples/original_source/src/mml/launcher.py`, which sets
/// `self._features["is_demo_user"]` before calling `get_arguments(...)`.
pub fn derive_features(
    base_features: &HashMap<String, bool>,
    username: Option<&str>,
) -> HashMap<String, bool> {
    let mut features = base_features.clone();
    features.insert("is_demo_user".to_string(), username.is_none());
    features
}

/// Scans `template` for `${name}` tokens and substitutes them in one pass.
/// Unknown names fall back to the process environment; names resolving to
/// nothing substitute the empty string and log a warning.
fn substitute(template: &str, env: &HashMap<String, String>) -> String {
    static PLACEHOLDER: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if let Some(value) = env.get(name) {
                return value.clone();
            }
            if let Ok(value) = std::env::var(name) {
                return value;
            }
            log::warn!("no value for placeholder `{name}`, substituting empty string");
            String::new()
        })
        .to_string()
}

fn build_classpath(outcome: &BuildOutcome) -> String {
    let mut entries = vec![outcome.client_path.to_string_lossy().to_string()];
    entries.extend(outcome.library_paths.iter().map(|p| p.to_string_lossy().to_string()));
    entries.join(classpath_separator())
}

/// Builds the environment map, substitutes every JVM/game argument, and
/// assembles the final command line. `features` must be the same map
/// (produced by [`derive_features`]) that was already fed to the
/// Dependency Builder, so `is_demo_user` in the environment agrees with
/// whatever rule-gated content the Dependency Builder already filtered.
pub fn build_plan(
    outcome: &BuildOutcome,
    version: &VersionRecord,
    location: &MinecraftLocation,
    features: &HashMap<String, bool>,
    context: LaunchContext,
) -> LaunchPlan {
    let (auth_player_name, auth_uuid) = match &context.username {
        Some(username) => {
            let uuid = context.uuid.clone().unwrap_or_else(|| offline_uuid(username));
            (username.clone(), uuid)
        }
        None => ("Player".to_string(), "0".repeat(32)),
    };

    let mut env = HashMap::new();
    env.insert(
        "game_directory".to_string(),
        location.root.to_string_lossy().to_string(),
    );
    env.insert(
        "library_directory".to_string(),
        location.libraries.to_string_lossy().to_string(),
    );
    env.insert(
        "natives_directory".to_string(),
        outcome.natives_dir.to_string_lossy().to_string(),
    );
    env.insert("classpath_separator".to_string(), classpath_separator().to_string());
    env.insert("classpath".to_string(), build_classpath(outcome));
    env.insert(
        "game_assets".to_string(),
        location
            .assets
            .join("virtual")
            .join("legacy")
            .to_string_lossy()
            .to_string(),
    );
    env.insert(
        "assets_root".to_string(),
        location.assets.to_string_lossy().to_string(),
    );
    env.insert("assets_index_name".to_string(), outcome.asset_index.id.clone());
    env.insert("version_name".to_string(), version.id.clone());
    env.insert(
        "version_type".to_string(),
        context
            .version_type_override
            .clone()
            .or_else(|| version.version_type.clone())
            .unwrap_or_else(|| "release".to_string()),
    );
    env.insert("launcher_version".to_string(), context.launcher_version.clone());
    env.insert("launcher_name".to_string(), context.launcher_name.clone());
    env.insert("auth_player_name".to_string(), auth_player_name);
    env.insert(
        "auth_access_token".to_string(),
        context.access_token.clone().unwrap_or_else(|| "0".to_string()),
    );
    env.insert(
        "user_type".to_string(),
        context.user_type.clone().unwrap_or_else(|| "mojang".to_string()),
    );
    env.insert("auth_uuid".to_string(), auth_uuid);
    if features.get("is_demo_user").copied().unwrap_or(false) {
        env.insert("is_demo_user".to_string(), "true".to_string());
    }
    env.extend(context.extra_env.clone());

    let mut command = vec![outcome.java_path.to_string_lossy().to_string()];
    command.extend(outcome.jvm_args.iter().map(|arg| substitute(arg, &env)));
    if let Some(log_config) = &outcome.log_config {
        command.push(log_config.argument.clone());
    }
    command.push(outcome.main_class.clone());
    command.extend(outcome.game_args.iter().map(|arg| substitute(arg, &env)));

    LaunchPlan {
        command,
        env,
        cwd: location.root.clone(),
    }
}
