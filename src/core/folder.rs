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

//! The on-disk layout the Engine owns under `game_dir` (spec §6).
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use depengine_core::core::folder::MinecraftLocation;
//!
//! let location = MinecraftLocation::new(".minecraft");
//!
//! assert_eq!(Path::new(".minecraft/mods").to_path_buf(), location.mods);
//! assert_eq!(
//!     Path::new(".minecraft/versions/1.19.4/1.19.4.json").to_path_buf(),
//!     location.version_json("1.19.4")
//! );
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
/// The Minecraft folder structure. Every method returns a path relative to
/// a game root such as `.minecraft`.
pub struct MinecraftLocation {
    pub root: PathBuf,
    pub libraries: PathBuf,
    pub assets: PathBuf,
    pub resourcepacks: PathBuf,
    pub mods: PathBuf,
    pub logs: PathBuf,
    pub latest_log: PathBuf,
    pub saves: PathBuf,
    pub versions: PathBuf,
    pub options: PathBuf,
    pub screenshots: PathBuf,
    pub jdk: PathBuf,
}

impl MinecraftLocation {
    pub fn new<S: AsRef<OsStr> + ?Sized>(root: &S) -> MinecraftLocation {
        let path = Path::new(root);
        MinecraftLocation {
            root: path.to_path_buf(),
            assets: path.join("assets"),
            libraries: path.join("libraries"),
            resourcepacks: path.join("resourcepacks"),
            mods: path.join("mods"),
            logs: path.join("logs"),
            latest_log: path.join("logs").join("latest.log"),
            saves: path.join("saves"),
            versions: path.join("versions"),
            options: path.join("options.txt"),
            screenshots: path.join("screenshots"),
            jdk: path.join("jdk"),
        }
    }

    pub fn version_root<P: AsRef<Path>>(&self, version: P) -> PathBuf {
        self.versions.join(version)
    }

    pub fn version_json(&self, version: &str) -> PathBuf {
        self.version_root(version).join(format!("{version}.json"))
    }

    pub fn version_jar(&self, version: &str) -> PathBuf {
        self.version_root(version).join(format!("{version}.jar"))
    }

    /// `versions/<id>/natives/` (spec §4.7: natives unpack destination).
    pub fn natives_root(&self, version: &str) -> PathBuf {
        self.version_root(version).join("natives")
    }

    pub fn library_by_path<P: AsRef<Path>>(&self, library_path: P) -> PathBuf {
        self.libraries.join(library_path)
    }

    pub fn asset_index(&self, assets_id: &str) -> PathBuf {
        self.assets.join("indexes").join(format!("{assets_id}.json"))
    }

    pub fn asset_object(&self, hash: &str) -> PathBuf {
        self.assets.join("objects").join(&hash[0..2]).join(hash)
    }

    pub fn asset_virtual_legacy(&self, object_name: &str) -> PathBuf {
        self.assets.join("virtual").join("legacy").join(object_name)
    }

    pub fn log_config(&self, file_id: &str) -> PathBuf {
        self.assets.join("log_configs").join(file_id)
    }
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_subtrees_under_root() {
        let location = MinecraftLocation::new(".minecraft");
        assert_eq!(Path::new(".minecraft/mods").to_path_buf(), location.mods);
        assert_eq!(
            Path::new(".minecraft/versions/1.19.4/1.19.4.json").to_path_buf(),
            location.version_json("1.19.4")
        );
        assert_eq!(
            Path::new(".minecraft/versions/1.19.4/natives").to_path_buf(),
            location.natives_root("1.19.4")
        );
    }

    // S2: asset placement.
    #[test]
    fn s2_asset_object_and_virtual_legacy_paths() {
        let location = MinecraftLocation::new(".minecraft");
        let hash = "abcdef0123456789";
        assert_eq!(
            location.asset_object(hash),
            Path::new(".minecraft/assets/objects/ab/abcdef0123456789")
        );
        assert_eq!(
            location.asset_virtual_legacy("sounds/ambient.ogg"),
            Path::new(".minecraft/assets/virtual/legacy/sounds/ambient.ogg")
        );
    }
}
