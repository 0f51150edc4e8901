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

//! Artifact Resolver
//!
//! Per-artifact state machine: exists? checksum-valid? download -> verify ->
//! unpack -> copy. Bounded retries (spec §4.4).

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;

use crate::error::{EngineError, EngineResult};

use super::artifact::{path_has_excluded_prefix, Artifact};

/// Flat inter-attempt sleep, no exponential backoff (spec §4.4/§9).
pub const ATTEMPT_DELAY: Duration = Duration::from_secs(1);
/// Total attempts per artifact, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// HTTP request timeout; spec allows 120-240s, 180s splits the difference.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(180);
const CHUNK_SIZE_HINT: usize = 8 * 1024;

/// `resolve(artifact, verify_checksums=true) -> path | Err`.
pub async fn resolve(artifact: &Artifact, verify_checksums: bool) -> EngineResult<PathBuf> {
    if artifact.exists() && (!verify_checksums || artifact.verify()) {
        log::debug!("artifact already present and valid: {:?}", artifact.destination());
    } else {
        fetch_with_retries(artifact).await?;
    }

    if let Some(unpack_into) = &artifact.unpack_into {
        unpack(artifact, unpack_into).await?;
    }

    if let Some(copy_to) = &artifact.copy_to {
        copy(artifact, copy_to).await?;
    }

    artifact
        .destination()
        .ok_or(EngineError::MissingField("path"))
}

async fn fetch_with_retries(artifact: &Artifact) -> EngineResult<()> {
    let url = artifact.url.as_ref().ok_or(EngineError::MissingField("url"))?;
    let dest = artifact.destination().ok_or(EngineError::MissingField("path"))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(EngineError::Http)?;

    let mut last_reason = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        match fetch_once(&client, url, &dest).await {
            Ok(()) => {
                if artifact.exists() && artifact.verify() {
                    return Ok(());
                }
                last_reason = "checksum mismatch after download".to_string();
                log::warn!("attempt {attempt}/{MAX_ATTEMPTS} for {url}: {last_reason}");
            }
            Err(reason) => {
                last_reason = reason;
                log::warn!("attempt {attempt}/{MAX_ATTEMPTS} for {url}: {last_reason}");
            }
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(ATTEMPT_DELAY).await;
        }
    }

    Err(EngineError::DownloadFailed {
        url: url.clone(),
        reason: last_reason,
    })
}

async fn fetch_once(client: &reqwest::Client, url: &str, dest: &std::path::Path) -> Result<(), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("unexpected status {}", response.status()));
    }

    let mut file = std::fs::File::create(dest).map_err(|e| e.to_string())?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        for part in chunk.chunks(CHUNK_SIZE_HINT) {
            file.write_all(part).map_err(|e| e.to_string())?;
        }
    }
    file.flush().map_err(|e| e.to_string())?;
    file.sync_all().map_err(|e| e.to_string())?;
    Ok(())
}

async fn unpack(artifact: &Artifact, unpack_into: &std::path::Path) -> EngineResult<()> {
    let source = artifact.destination().ok_or(EngineError::MissingField("path"))?;
    let unpack_into = unpack_into.to_path_buf();
    let exclude_prefixes = artifact.exclude_prefixes.clone();

    tokio::task::spawn_blocking(move || -> EngineResult<()> {
        let file = std::fs::File::open(&source).map_err(EngineError::Io)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| EngineError::UnpackFailed {
            into: unpack_into.clone(),
            reason: e.to_string(),
        })?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| EngineError::UnpackFailed {
                into: unpack_into.clone(),
                reason: e.to_string(),
            })?;
            let name = entry.name().to_string();
            if path_has_excluded_prefix(&name, &exclude_prefixes) {
                continue;
            }
            let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                continue;
            };
            let out_path = unpack_into.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(EngineError::Io)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(EngineError::Io)?;
            }
            let mut out_file = std::fs::File::create(&out_path).map_err(EngineError::Io)?;
            std::io::copy(&mut entry, &mut out_file).map_err(EngineError::Io)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::UnpackFailed {
        into: artifact.unpack_into.clone().unwrap_or_default(),
        reason: e.to_string(),
    })??;
    Ok(())
}

async fn copy(artifact: &Artifact, copy_to: &std::path::Path) -> EngineResult<()> {
    if tokio::fs::try_exists(copy_to).await.unwrap_or(false) {
        return Ok(());
    }
    let source = artifact.destination().ok_or(EngineError::MissingField("path"))?;
    if let Some(parent) = copy_to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::CopyFailed {
                from: source.clone(),
                to: copy_to.to_path_buf(),
                reason: e.to_string(),
            })?;
    }
    tokio::fs::copy(&source, copy_to)
        .await
        .map_err(|e| EngineError::CopyFailed {
            from: source,
            to: copy_to.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::ArtifactOverrides;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_short_circuits_on_valid_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jar"), b"payload").unwrap();
        let raw = json!({"path": "a.jar"});
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());
        let path = resolve(&artifact, true).await.unwrap();
        assert_eq!(path, dir.path().join("a.jar"));
    }

    #[tokio::test]
    async fn missing_url_and_path_fails_fast_when_not_local() {
        let raw = json!({});
        let artifact = Artifact::from_raw(&raw, PathBuf::from("/nonexistent-root"), ArtifactOverrides::default());
        let result = resolve(&artifact, true).await;
        assert!(matches!(result, Err(EngineError::MissingField("path"))));
    }

    #[tokio::test]
    async fn copy_to_skips_when_destination_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jar"), b"payload").unwrap();
        let copy_dest = dir.path().join("copied.jar");
        std::fs::write(&copy_dest, b"untouched").unwrap();

        let raw = json!({"path": "a.jar"});
        let overrides = ArtifactOverrides {
            copy_to: Some(copy_dest.clone()),
            ..Default::default()
        };
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), overrides);
        resolve(&artifact, true).await.unwrap();
        assert_eq!(std::fs::read(&copy_dest).unwrap(), b"untouched");
    }

    // S6: retry. Two checksum-mismatching bodies, then a correct one;
    // resolve() succeeds after exactly MAX_ATTEMPTS attempts.
    #[tokio::test]
    async fn s6_retry_succeeds_on_third_attempt_after_two_checksum_mismatches() {
        use sha1::{Digest, Sha1};
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;

        let good_body = b"the-real-artifact-bytes".to_vec();
        let mut hasher = Sha1::new();
        hasher.update(&good_body);
        let good_sha1: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

        let requests = Arc::new(AtomicU32::new(0));
        let requests_in_mock = requests.clone();
        let good_body_in_mock = good_body.clone();
        let _mock = server
            .mock("GET", "/artifact.jar")
            .with_status(200)
            .with_body_from_request(move |_req| {
                let attempt = requests_in_mock.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    b"truncated-garbage".to_vec()
                } else {
                    good_body_in_mock.clone()
                }
            })
            .create_async()
            .await;

        let raw = json!({
            "url": format!("{}/artifact.jar", server.url()),
            "path": "a.jar",
            "sha1": good_sha1,
            "size": good_body.len() as u64,
        });
        let artifact = Artifact::from_raw(&raw, dir.path().to_path_buf(), ArtifactOverrides::default());

        let path = resolve(&artifact, true).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), good_body);
        assert_eq!(requests.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
