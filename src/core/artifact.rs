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

//! Artifact Descriptor
//!
//! Normalizes heterogeneous per-file descriptors (old Maven-coordinate form,
//! new explicit form) into the uniform [`Artifact`] record, and performs
//! Maven-coordinate normalization (spec §3).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest as Md5Digest, Md5};
use serde_json::Value;
use sha1::{Digest as Sha1DigestTrait, Sha1};
use sha2::{Sha256, Sha512};

const DEFAULT_MAVEN_ROOT: &str = "https://libraries.minecraft.net/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Md5,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    fn from_key(key: &str) -> Option<ChecksumAlgorithm> {
        match key {
            "sha1" => Some(ChecksumAlgorithm::Sha1),
            "md5" => Some(ChecksumAlgorithm::Md5),
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "sha512" => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }

    fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// A tiny hex-encoding shim so this module does not need to pull in the
/// `hex` crate just for `Vec<u8> -> String`.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Immutable descriptor of one file to materialize (spec §3).
#[derive(Debug, Clone)]
pub struct Artifact {
    pub parent_dir: PathBuf,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub size: u64,
    pub checksums: Vec<(ChecksumAlgorithm, String)>,
    pub unpack_into: Option<PathBuf>,
    pub exclude_prefixes: Vec<String>,
    pub copy_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactOverrides {
    pub target_file: Option<PathBuf>,
    pub unpack_into: Option<PathBuf>,
    pub exclude_prefixes: Vec<String>,
    pub copy_to: Option<PathBuf>,
}

impl Artifact {
    /// Builds the uniform record from a raw JSON fragment plus overrides.
    /// Applies Maven-coordinate normalization when `path` is absent but a
    /// `group:name:version` coordinate is present under `name`.
    pub fn from_raw(raw: &Value, parent_dir: PathBuf, overrides: ArtifactOverrides) -> Artifact {
        let mut path = overrides
            .target_file
            .clone()
            .or_else(|| raw.get("path").and_then(Value::as_str).map(PathBuf::from));

        let mut synthesized_url = None;
        if path.is_none() {
            if let Some(name) = raw.get("name").and_then(Value::as_str) {
                if let Some((synth_path, default_url)) = normalize_maven_coordinate(name) {
                    path = Some(PathBuf::from(&synth_path));
                    synthesized_url = Some(default_url);
                }
            }
        }

        let url = raw
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(synthesized_url);

        let size = raw.get("size").and_then(Value::as_u64).unwrap_or(0);

        Artifact {
            parent_dir,
            path,
            url,
            size,
            checksums: extract_checksums(raw),
            unpack_into: overrides.unpack_into,
            exclude_prefixes: overrides.exclude_prefixes,
            copy_to: overrides.copy_to,
        }
    }

    /// Absolute destination path under `parent_dir`.
    pub fn destination(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| self.parent_dir.join(p))
    }

    pub fn exists(&self) -> bool {
        self.destination().map(|p| p.exists()).unwrap_or(false)
    }

    /// Verification accepts any of the declared checksums; the first
    /// matching algorithm passes the artifact. No declared checksum means
    /// the artifact is trusted by existence.
    pub fn verify(&self) -> bool {
        if self.checksums.is_empty() {
            return true;
        }
        let Some(dest) = self.destination() else {
            return false;
        };
        let Ok(mut file) = File::open(&dest) else {
            return false;
        };
        let mut contents = Vec::new();
        if file.read_to_end(&mut contents).is_err() {
            return false;
        }
        self.checksums
            .iter()
            .any(|(algo, expected)| algo.digest_hex(&contents).eq_ignore_ascii_case(expected))
    }
}

fn extract_checksums(raw: &Value) -> Vec<(ChecksumAlgorithm, String)> {
    let mut checksums = Vec::new();

    // Legacy singular `checksum: <hex>`, treated as SHA-1.
    if let Some(hex) = raw.get("checksum").and_then(Value::as_str) {
        checksums.push((ChecksumAlgorithm::Sha1, hex.to_string()));
    }
    // Legacy `checksums: [<hex>, ...]`, each candidate treated as SHA-1.
    if let Some(list) = raw.get("checksums").and_then(Value::as_array) {
        for entry in list {
            if let Some(hex) = entry.as_str() {
                checksums.push((ChecksumAlgorithm::Sha1, hex.to_string()));
            }
        }
    }
    // Modern explicit per-algorithm keys.
    for key in ["sha1", "md5", "sha256", "sha512"] {
        if let Some(hex) = raw.get(key).and_then(Value::as_str) {
            if let Some(algo) = ChecksumAlgorithm::from_key(key) {
                checksums.push((algo, hex.to_string()));
            }
        }
    }
    checksums
}

const KNOWN_EXTENSIONS: &[&str] = &["jar", "zip", "dll", "so"];

/// `group:name:version[:classifier][@ext]` -> `(path, default_url)`.
/// Idempotent: re-normalizing an already-synthesized path through this same
/// function with the same coordinate yields the same output (spec §8,
/// invariant 4).
pub fn normalize_maven_coordinate(coordinate: &str) -> Option<(String, String)> {
    let (coordinate, ext) = match coordinate.split_once('@') {
        Some((base, ext)) if KNOWN_EXTENSIONS.contains(&ext) => (base, ext),
        _ => (coordinate, "jar"),
    };

    let parts: Vec<&str> = coordinate.split(':').collect();
    if parts.len() < 3 {
        return None;
    }
    let group = parts[0];
    let name = parts[1];
    let version = parts[2];
    let classifier = parts.get(3).copied();

    let group_as_dirs = group.replace('.', "/");

    let file_name = if group == "net.minecraftforge" && classifier.is_none() {
        format!("{name}-{version}-universal.{ext}")
    } else if let Some(classifier) = classifier {
        format!("{name}-{version}-{classifier}.{ext}")
    } else {
        format!("{name}-{version}.{ext}")
    };

    let path = format!("{group_as_dirs}/{name}/{version}/{file_name}");
    let url = join_url(DEFAULT_MAVEN_ROOT, &path);
    Some((path, url))
}

/// Appends `path` to `root`, ensuring exactly one separator between them.
pub fn join_url(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{root}/{path}")
}

pub fn path_has_excluded_prefix(entry_name: &str, exclude_prefixes: &[String]) -> bool {
    exclude_prefixes.iter().any(|prefix| entry_name.starts_with(prefix.as_str()))
}

pub fn path_to_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // S4: Maven normalization.
    #[test]
    fn s4_maven_normalization() {
        let (path, url) =
            normalize_maven_coordinate("net.fabricmc:sponge-mixin:0.13.3+mixin.0.8.5").unwrap();
        assert_eq!(
            path,
            "net/fabricmc/sponge-mixin/0.13.3+mixin.0.8.5/sponge-mixin-0.13.3+mixin.0.8.5.jar"
        );
        assert!(url.ends_with(&path));
        assert!(!url.contains("//sponge") && !url[8..].contains("//"));
    }

    #[test]
    fn forge_universal_tail() {
        let (path, _) = normalize_maven_coordinate("net.minecraftforge:forge:1.12.2-14.23.5.2860").unwrap();
        assert!(path.ends_with("forge-1.12.2-14.23.5.2860-universal.jar"));
    }

    // Invariant 4: idempotent normalization.
    #[test]
    fn normalization_is_idempotent() {
        let coordinate = "org.lwjgl:lwjgl:3.3.1";
        let (path_a, url_a) = normalize_maven_coordinate(coordinate).unwrap();
        // Normalizing a raw descriptor that already carries an explicit path
        // does not go through coordinate synthesis again.
        let raw = serde_json::json!({"path": path_a, "url": url_a});
        let artifact = Artifact::from_raw(&raw, PathBuf::from("libraries"), ArtifactOverrides::default());
        assert_eq!(artifact.path, Some(PathBuf::from(path_a.clone())));
        assert_eq!(artifact.url, Some(url_a));
    }

    #[test]
    fn checksum_absent_trusts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.jar");
        std::fs::write(&file_path, b"hello").unwrap();
        let raw = serde_json::json!({"path": "a.jar"});
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
        assert!(artifact.exists());
        assert!(artifact.verify());
    }

    #[test]
    fn checksum_mismatch_fails_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.jar");
        std::fs::write(&file_path, b"hello").unwrap();
        let raw = serde_json::json!({"path": "a.jar", "sha1": "0000000000000000000000000000000000000"});
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
        assert!(!artifact.verify());
    }

    #[test]
    fn legacy_checksums_array_is_treated_as_sha1() {
        let raw = serde_json::json!({"path": "a.jar", "checksums": ["deadbeef"]});
        let artifact = Artifact::from_raw(&raw, PathBuf::from("."), ArtifactOverrides::default());
        assert_eq!(artifact.checksums, vec![(ChecksumAlgorithm::Sha1, "deadbeef".to_string())]);
    }
}
