// Web-of-trust database (wotdb)
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2023-2024 by
//     Cypher<cypher@cyphernet.io>
//
// Copyright 2023-2024 Cyphernet DAO, Switzerland
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CLI-facing configuration: resolving the on-disk data directory the
//! `wotdb-cli` binary uses for its trust-database file and owner-trust
//! export/import. Trust-computation tuning ([`crate::trust::TrustOptions`])
//! is a separate, unrelated knob and lives in [`crate::trust`].

use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "WOTDB_DATA_DIR";

#[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub const DATA_DIR: &str = "~/.wotdb";
#[cfg(target_os = "macos")]
pub const DATA_DIR: &str = "~/Library/Application Support/WoTDB";
#[cfg(target_os = "windows")]
pub const DATA_DIR: &str = "~\\AppData\\Local\\WoTDB";
#[cfg(target_os = "ios")]
pub const DATA_DIR: &str = "~/Documents";
#[cfg(target_os = "android")]
pub const DATA_DIR: &str = ".";

/// Expands a leading `~` and ensures the directory exists, mirroring the
/// data-dir handling the teacher's own CLI performs in `Cli::process`.
#[cfg(feature = "cli")]
pub fn resolve_data_dir(raw: &std::path::Path) -> std::io::Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(&raw.display().to_string()).to_string());
    std::fs::create_dir_all(&expanded)?;
    Ok(expanded)
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn resolve_data_dir_creates_directory() {
        let base = std::env::temp_dir().join(format!("wotdb-config-test-{}", std::process::id()));
        let dir = resolve_data_dir(&base).unwrap();
        assert!(dir.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
