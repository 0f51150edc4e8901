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

//! Optional logging setup (ambient addition; see SPEC_FULL.md §6).
//!
//! The Engine itself never initializes logging: it only calls
//! `log::{debug,info,warn,error}!` and leaves process-wide setup to the
//! caller. `init` is offered as a convenience for binaries embedding this
//! crate that have no logging setup of their own, mirroring the console
//! format `examples/original_source/src/mml/logging_handler.py` writes.

use std::io::Write;

use log::LevelFilter;

/// Installs an `env_logger` subscriber with `[date time] [L] message`
/// formatting. `verbose` selects `Debug` instead of `Info` as the default
/// level; `RUST_LOG` still overrides both. Safe to call more than once;
/// later calls are no-ops.
pub fn init(verbose: bool) {
    let default_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_env("RUST_LOG")
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level().as_str().chars().next().unwrap_or('?'),
                record.args()
            )
        })
        .try_init();
}
