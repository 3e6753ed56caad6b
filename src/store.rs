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

//! The record-store interface the core consumes (spec §6, component C1):
//! typed read/write/delete by record number, allocation, sync, and batched
//! transactions. The block allocator and on-disk page file are explicitly
//! out of scope (spec §1) — [`InMemoryStore`] is a test double, not a
//! production page file; it exists so [`crate::update`], [`crate::hints`]
//! and [`crate::trust`] can be driven against a real `RecordStore` without
//! standing up an actual fixed-size-block allocator.

use std::cell::RefCell;
use std::collections::BTreeMap;

use log::{debug, error};

use crate::ids::{Fingerprint, KeyId, Lid, PubkeyAlgo};
use crate::record::{Record, RecordType};

/// The record-store contract the core consumes. Fatal read/write failures
/// are represented by [`StoreError::Corrupt`] — per spec §5/§7 these are
/// never converted into recoverable errors by callers, since the in-memory
/// graph state is no longer trustworthy once one occurs.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum StoreError {
    /// no record exists at {0}.
    NotFound(Lid),

    /// record {0} is not of the expected type.
    TypeMismatch(Lid),

    /// the store is corrupt and cannot continue serving reads/writes.
    Corrupt,

    /// a transaction is already open.
    TransactionAlreadyOpen,

    /// no transaction is open to commit or cancel.
    NoTransactionOpen,
}

pub trait RecordStore {
    /// Reads a record; if `expected_type` is `Some` and the record's actual
    /// type differs, returns [`StoreError::TypeMismatch`] (spec §6).
    fn read(&self, recno: Lid, expected_type: Option<RecordType>) -> Result<Record, StoreError>;

    /// Writes a record by its own `recnum`.
    fn write(&self, rec: Record) -> Result<(), StoreError>;

    /// Marks a record deleted/free.
    fn delete(&self, recno: Lid) -> Result<(), StoreError>;

    /// Allocates a fresh record number.
    fn new_recnum(&self) -> Lid;

    /// Flushes to stable storage.
    fn sync(&self) -> Result<(), StoreError>;

    fn begin_transaction(&self) -> Result<(), StoreError>;
    fn end_transaction(&self) -> Result<(), StoreError>;
    fn cancel_transaction(&self) -> Result<(), StoreError>;

    /// Finds a DIR by any of a keyblock's key fingerprints.
    fn search_dir_byfpr(&self, fpr: &Fingerprint) -> Option<Lid>;

    /// Finds an SDIR by key-id, optionally constrained to a pubkey algo
    /// (algo `0` means "any").
    fn search_sdir(&self, keyid: KeyId, algo: Option<PubkeyAlgo>) -> Option<Lid>;

    /// Debug pretty-print of a record.
    fn dump_record(&self, rec: &Record, sink: &mut dyn std::fmt::Write) -> std::fmt::Result {
        writeln!(sink, "{rec:#?}")
    }

    /// Whether the current transaction has performed any write.
    fn is_dirty(&self) -> bool;

    /// Every DIR LID currently in the store. Not part of spec §6's listed
    /// interface, but required by owner-trust export (spec §4.7), which
    /// walks every DIR with non-zero ownertrust; a real page-file store
    /// would implement this as a sequential scan of its record blocks.
    fn iter_dirs(&self) -> Vec<Lid>;
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<u32, Record>,
    next_recnum: u32,
    in_transaction: bool,
    dirty: bool,
    /// fingerprint -> LID of the DIR owning a KEY with that fingerprint
    /// (spec §3 invariant 2: fingerprints are unique across DIRs).
    fpr_index: BTreeMap<Fingerprint, Lid>,
    /// (keyid, algo) -> LID of the SDIR.
    sdir_index: BTreeMap<(KeyId, u8), Lid>,
}

/// An in-memory [`RecordStore`]. Single-threaded, like the rest of the core
/// (spec §5): a `RefCell` is enough, no locking required.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RefCell<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Rebuilds the fingerprint/SDIR indices from the current record set.
    /// Called after every write that could have changed them; simpler than
    /// maintaining them incrementally and correct by construction, which
    /// matters more than micro-efficiency for a test double.
    fn reindex(&self, inner: &mut Inner) {
        inner.fpr_index.clear();
        inner.sdir_index.clear();
        for rec in inner.records.values() {
            match rec {
                Record::Key(key) => {
                    inner.fpr_index.insert(key.fingerprint, key.lid);
                }
                Record::Sdir(sdir) => {
                    inner.sdir_index.insert((sdir.keyid, sdir.pubkey_algo.0), sdir.lid);
                }
                _ => {}
            }
        }
    }
}

impl RecordStore for InMemoryStore {
    fn read(&self, recno: Lid, expected_type: Option<RecordType>) -> Result<Record, StoreError> {
        let inner = self.inner.borrow();
        let rec = inner.records.get(&recno.to_u32()).ok_or(StoreError::NotFound(recno))?;
        if let Some(expected) = expected_type {
            if rec.record_type() != expected {
                return Err(StoreError::TypeMismatch(recno));
            }
        }
        Ok(rec.clone())
    }

    fn write(&self, rec: Record) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        inner.records.insert(rec.recnum().to_u32(), rec);
        inner.dirty = true;
        self.reindex(&mut inner);
        Ok(())
    }

    fn delete(&self, recno: Lid) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.records.remove(&recno.to_u32()).is_none() {
            debug!("delete of already-absent record {recno}");
        }
        inner.dirty = true;
        self.reindex(&mut inner);
        Ok(())
    }

    fn new_recnum(&self) -> Lid {
        let mut inner = self.inner.borrow_mut();
        inner.next_recnum += 1;
        Lid::new(inner.next_recnum)
    }

    fn sync(&self) -> Result<(), StoreError> { Ok(()) }

    fn begin_transaction(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.in_transaction {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        inner.in_transaction = true;
        inner.dirty = false;
        Ok(())
    }

    fn end_transaction(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.in_transaction {
            return Err(StoreError::NoTransactionOpen);
        }
        inner.in_transaction = false;
        Ok(())
    }

    fn cancel_transaction(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.in_transaction {
            return Err(StoreError::NoTransactionOpen);
        }
        inner.in_transaction = false;
        error!("transaction cancelled; caller-visible state rolled back is the caller's responsibility");
        Ok(())
    }

    fn search_dir_byfpr(&self, fpr: &Fingerprint) -> Option<Lid> {
        self.inner.borrow().fpr_index.get(fpr).copied()
    }

    fn search_sdir(&self, keyid: KeyId, algo: Option<PubkeyAlgo>) -> Option<Lid> {
        let inner = self.inner.borrow();
        match algo {
            Some(algo) => inner.sdir_index.get(&(keyid, algo.0)).copied(),
            None => inner
                .sdir_index
                .iter()
                .find(|((id, _), _)| *id == keyid)
                .map(|(_, lid)| *lid),
        }
    }

    fn is_dirty(&self) -> bool { self.inner.borrow().dirty }

    fn iter_dirs(&self) -> Vec<Lid> {
        self.inner
            .borrow()
            .records
            .values()
            .filter_map(|rec| match rec {
                Record::Dir(dir) => Some(dir.lid),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Dir;

    #[test]
    fn write_then_read_round_trips() {
        let store = InMemoryStore::new();
        let lid = store.new_recnum();
        let dir = Dir {
            lid,
            ..Default::default()
        };
        store.write(Record::Dir(dir.clone())).unwrap();
        let read_back = store.read(lid, Some(RecordType::Dir)).unwrap();
        assert_eq!(read_back.as_dir().unwrap(), &dir);
    }

    #[test]
    fn read_wrong_type_errors() {
        let store = InMemoryStore::new();
        let lid = store.new_recnum();
        store
            .write(Record::Dir(Dir {
                lid,
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(store.read(lid, Some(RecordType::Sig)), Err(StoreError::TypeMismatch(lid)));
    }

    #[test]
    fn search_dir_byfpr_finds_owning_dir() {
        use crate::record::Key;

        let store = InMemoryStore::new();
        let dir_lid = store.new_recnum();
        let key_lid = store.new_recnum();
        let fpr = Fingerprint::new(&[1u8; 20]);
        store
            .write(Record::Dir(Dir {
                lid: dir_lid,
                keylist: key_lid,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Key(Key {
                recnum: key_lid,
                lid: dir_lid,
                fingerprint: fpr,
                next: Lid::NONE,
                pubkey_algo: PubkeyAlgo(1),
            }))
            .unwrap();
        assert_eq!(store.search_dir_byfpr(&fpr), Some(dir_lid));
    }
}
