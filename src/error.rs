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

//! The error taxonomy shared by the resolver, pool, version graph resolver
//! and dependency builder.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("descriptor is missing required field `{0}` for this operation")]
    MissingField(&'static str),

    #[error("checksum mismatch for {path}: expected one of {expected:?}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: Vec<String>,
    },

    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("failed to unpack archive into {into}: {reason}")]
    UnpackFailed { into: PathBuf, reason: String },

    #[error("failed to copy {from} to {to}: {reason}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("unsupported host platform")]
    UnsupportedPlatform,

    #[error("no compatible java runtime is available: {0}")]
    JavaUnavailable(String),

    #[error("version `{id}` requires launcher version {required}, this engine declares {declared}")]
    VersionRequiresNewerLauncher {
        id: String,
        required: i32,
        declared: i32,
    },

    #[error("operation was interrupted")]
    Interrupted,

    #[error("version `{0}` was not found")]
    VersionNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
