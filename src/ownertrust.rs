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

//! Owner-trust export/import (spec §4.7, component C9): the bridge between
//! the per-DIR `ownertrust` byte and the line-based, fingerprint-keyed text
//! format an operator can back up, diff, and restore (spec §6, "User-visible
//! owner-trust file format").

use std::io::{BufRead, Write};
use std::str::FromStr;

use log::debug;

use crate::crypto::Keyring;
use crate::error::{CoreError, CorruptionError, RecoverableError};
use crate::ids::Fingerprint;
use crate::record::{Dir, Record};
use crate::store::RecordStore;
use crate::update::Updater;

/// Failures reading or parsing an owner-trust stream (spec §6: a malformed
/// line, an overlong line, or a line missing its trailing newline aborts
/// the whole stream, rather than being skipped).
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum OwnerTrustError {
    /// malformed owner-trust line: {0:?}.
    Malformed(String),

    /// owner-trust line exceeded the maximum length.
    Overlong,

    /// owner-trust line has no trailing newline.
    MissingNewline,

    /// failed to read from the owner-trust stream.
    Io,

    #[display(inner)]
    #[from]
    Core(CoreError),
}

/// The maximum length of one owner-trust line, fingerprint plus a
/// generously wide owner-trust field; anything longer is almost certainly
/// a corrupted or truncated file and is treated per spec §6 as malformed.
const MAX_LINE_LEN: usize = 128;

/// Summary of an `import` run (mirrors the bulk-operation counters spec §7
/// asks `update_trustdb`/`check_trustdb` to report).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct OwnerTrustImport {
    /// Lines that updated an existing DIR's ownertrust.
    pub updated: u32,
    /// Lines whose key had to be fetched and inserted before the update.
    pub inserted: u32,
    /// Lines skipped because the owner-trust value was zero.
    pub skipped: u32,
}

/// Writes `<hex fingerprint>:<decimal ownertrust>:` for every DIR with a
/// non-zero ownertrust (spec §4.7 "Export").
pub fn export<S: RecordStore>(store: &S, sink: &mut dyn Write) -> Result<(), OwnerTrustError> {
    for lid in store.iter_dirs() {
        let rec = store
            .read(lid, Some(crate::record::RecordType::Dir))
            .map_err(|_| CorruptionError::ReadFailed(lid))?;
        let dir = rec.as_dir().expect("iter_dirs only yields DIR lids");
        if dir.ownertrust == 0 {
            continue;
        }
        let fpr = primary_fingerprint(store, dir)?;
        writeln!(sink, "{fpr}:{}:", dir.ownertrust).map_err(|_| OwnerTrustError::Io)?;
    }
    store.sync().map_err(|_| CorruptionError::SyncFailed)?;
    Ok(())
}

/// Reads lines of the form `<hex fingerprint>:<decimal ownertrust>:`,
/// applying each to the matching DIR (spec §4.7 "Import"). Comment (`#`)
/// and blank lines are skipped; anything else malformed, overlong, or
/// missing its trailing newline aborts the whole stream.
pub fn import<S, K>(
    store: &S,
    keyring: &K,
    source: &mut dyn BufRead,
) -> Result<OwnerTrustImport, OwnerTrustError>
where
    S: RecordStore,
    K: Keyring,
{
    let mut stats = OwnerTrustImport::default();
    let updater = Updater::new(store, keyring);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = source.read_until(b'\n', &mut raw).map_err(|_| OwnerTrustError::Io)?;
        if n == 0 {
            break;
        }
        if raw.len() > MAX_LINE_LEN {
            return Err(OwnerTrustError::Overlong);
        }
        if raw.last() != Some(&b'\n') {
            return Err(OwnerTrustError::MissingNewline);
        }
        let line = std::str::from_utf8(&raw[..raw.len() - 1])
            .map_err(|_| OwnerTrustError::Malformed(String::from_utf8_lossy(&raw).into_owned()))?
            .trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        apply_line(store, keyring, &updater, line, &mut stats)?;
    }
    store.sync().map_err(|_| CorruptionError::SyncFailed)?;
    Ok(stats)
}

fn apply_line<S, K>(
    store: &S,
    keyring: &K,
    updater: &Updater<'_, S, K>,
    line: &str,
    stats: &mut OwnerTrustImport,
) -> Result<(), OwnerTrustError>
where
    S: RecordStore,
    K: Keyring,
{
    let mut fields = line.splitn(3, ':');
    let fpr_field = fields.next().ok_or_else(|| OwnerTrustError::Malformed(line.to_owned()))?;
    let trust_field = fields.next().ok_or_else(|| OwnerTrustError::Malformed(line.to_owned()))?;

    let fpr = Fingerprint::from_str(fpr_field).map_err(|_| OwnerTrustError::Malformed(line.to_owned()))?;
    let ownertrust: u8 = trust_field
        .parse()
        .map_err(|_| OwnerTrustError::Malformed(line.to_owned()))?;

    if ownertrust == 0 {
        stats.skipped += 1;
        return Ok(());
    }

    let dir_lid = match store.search_dir_byfpr(&fpr) {
        Some(lid) => lid,
        None => {
            let pk = keyring
                .get_pubkey_byfpr(&fpr)
                .ok_or(RecoverableError::NotFound)
                .map_err(CoreError::from)?;
            let lid = updater.insert(&pk)?.dir_lid;
            stats.inserted += 1;
            lid
        }
    };

    let rec = store
        .read(dir_lid, Some(crate::record::RecordType::Dir))
        .map_err(|_| CorruptionError::ReadFailed(dir_lid))?;
    let mut dir = rec.as_dir().expect("read with expected_type=Dir").clone();
    dir.ownertrust = ownertrust;
    store
        .write(Record::Dir(dir))
        .map_err(|_| CorruptionError::WriteFailed(dir_lid))?;
    stats.updated += 1;
    Ok(())
}

fn primary_fingerprint<S: RecordStore>(store: &S, dir: &Dir) -> Result<Fingerprint, OwnerTrustError> {
    if dir.keylist.is_none() {
        debug!("export: dir {} has no keylist, skipping", dir.lid);
        return Err(CorruptionError::DirectoryWithoutKeys(dir.lid).into());
    }
    let rec = store
        .read(dir.keylist, Some(crate::record::RecordType::Key))
        .map_err(|_| CorruptionError::ReadFailed(dir.keylist))?;
    let key = rec.as_key().expect("read with expected_type=Key");
    Ok(key.fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ristretto::{RistrettoKeyring, RistrettoSk};
    use crate::store::InMemoryStore;

    #[test]
    fn export_skips_zero_ownertrust() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        let pk = sk.public_key();
        let updater = Updater::new(&store, &keyring);
        updater.insert(&pk).unwrap();

        let mut out = Vec::new();
        export(&store, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn export_then_import_round_trips_ownertrust() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        let pk = sk.public_key();
        let fpr = keyring.fingerprint_from_pk(&pk);
        let updater = Updater::new(&store, &keyring);
        let dir_lid = updater.insert(&pk).unwrap().dir_lid;

        let rec = store.read(dir_lid, Some(crate::record::RecordType::Dir)).unwrap();
        let mut dir = rec.as_dir().unwrap().clone();
        dir.ownertrust = 5;
        store.write(Record::Dir(dir)).unwrap();

        let mut out = Vec::new();
        export(&store, &mut out).unwrap();
        let expected = format!("{fpr}:5:\n");
        assert_eq!(String::from_utf8(out.clone()).unwrap(), expected);

        // clear it, then restore from the exported line
        let rec = store.read(dir_lid, Some(crate::record::RecordType::Dir)).unwrap();
        let mut dir = rec.as_dir().unwrap().clone();
        dir.ownertrust = 0;
        store.write(Record::Dir(dir)).unwrap();

        let mut cursor = std::io::Cursor::new(out);
        let stats = import(&store, &keyring, &mut cursor).unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.inserted, 0);

        let rec = store.read(dir_lid, Some(crate::record::RecordType::Dir)).unwrap();
        assert_eq!(rec.as_dir().unwrap().ownertrust, 5);
    }

    #[test]
    fn import_skips_comments_and_blank_lines() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let mut cursor = std::io::Cursor::new(b"# a comment\n\n".to_vec());
        let stats = import(&store, &keyring, &mut cursor).unwrap();
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn import_rejects_missing_trailing_newline() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let mut cursor = std::io::Cursor::new(b"0102030405060708090A0B0C0D0E0F1011121314:5:".to_vec());
        assert!(matches!(
            import(&store, &keyring, &mut cursor),
            Err(OwnerTrustError::MissingNewline)
        ));
    }

    #[test]
    fn import_skips_zero_ownertrust_line() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let mut cursor =
            std::io::Cursor::new(b"0102030405060708090A0B0C0D0E0F1011121314:0:\n".to_vec());
        let stats = import(&store, &keyring, &mut cursor).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.updated, 0);
    }
}
