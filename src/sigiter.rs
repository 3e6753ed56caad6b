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

//! Lazy walk over every non-deleted signature slot owned by a directory
//! entry (spec §4.2, component C4): UID-list order, then per-UID siglist
//! order, then slot index.

use crate::error::{CoreError, CorruptionError};
use crate::ids::Lid;
use crate::localid::LocalIdSet;
use crate::record::{Record, RecordType, Sig, SigSlot};
use crate::store::RecordStore;

/// Yields `(signer_lid, flag)` for every live slot, in spec §4.2 order.
/// Stops (returns `None`) after the first error, since a corrupt chain
/// cannot be walked any further.
pub struct SigIter<'s, S: RecordStore> {
    store: &'s S,
    dir_lid: Lid,
    done: bool,
    errored: bool,
    /// Next UID record to load, or `Lid::NONE` once the uidlist is exhausted.
    next_uid: Lid,
    current_sig: Option<Sig>,
    slot_idx: usize,
}

impl<'s, S: RecordStore> SigIter<'s, S> {
    /// Spec §4.2: "On initialization, reads the DIR record; if it is not a
    /// DIR, yields end-of-stream" — not an error, just an empty iterator.
    pub fn new(store: &'s S, dir_lid: Lid) -> Self {
        match store.read(dir_lid, Some(RecordType::Dir)) {
            Ok(Record::Dir(dir)) => SigIter {
                store,
                dir_lid,
                done: false,
                errored: false,
                next_uid: dir.uidlist,
                current_sig: None,
                slot_idx: 0,
            },
            _ => SigIter {
                store,
                dir_lid,
                done: true,
                errored: false,
                next_uid: Lid::NONE,
                current_sig: None,
                slot_idx: 0,
            },
        }
    }

    fn load_sig_chain_head(&mut self, head: Lid) -> Result<(), CoreError> {
        if head.is_none() {
            self.current_sig = None;
            return Ok(());
        }
        let rec = self
            .store
            .read(head, Some(RecordType::Sig))
            .map_err(|_| CorruptionError::ReadFailed(head))?;
        let sig = rec.as_sig().expect("read enforced RecordType::Sig").clone();
        if sig.lid != self.dir_lid {
            return Err(CorruptionError::SignatureOwnerMismatch {
                owner: self.dir_lid,
                found: sig.lid,
            }
            .into());
        }
        self.current_sig = Some(sig);
        self.slot_idx = 0;
        Ok(())
    }

    fn advance_uid(&mut self) -> Result<(), CoreError> {
        if self.next_uid.is_none() {
            self.done = true;
            return Ok(());
        }
        let rec = self
            .store
            .read(self.next_uid, Some(RecordType::Uid))
            .map_err(|_| CorruptionError::ReadFailed(self.next_uid))?;
        let uid = rec.as_uid().expect("read enforced RecordType::Uid").clone();
        self.next_uid = uid.next;
        self.load_sig_chain_head(uid.siglist)
    }

    fn current_slot(&self) -> Option<SigSlot> {
        self.current_sig.as_ref().and_then(|sig| sig.slots.get(self.slot_idx).copied())
    }

    fn step(&mut self) -> Result<Option<(Lid, u8)>, CoreError> {
        loop {
            if self.done {
                return Ok(None);
            }
            match self.current_slot() {
                Some(slot) => {
                    self.slot_idx += 1;
                    if slot.is_deleted() {
                        continue;
                    }
                    return Ok(Some((slot.lid, slot.flag)));
                }
                None => {
                    let next = self.current_sig.as_ref().map(|s| s.next).unwrap_or(Lid::NONE);
                    if !next.is_none() {
                        self.load_sig_chain_head(next)?;
                        continue;
                    }
                    self.advance_uid()?;
                    if self.current_sig.is_none() && self.done {
                        return Ok(None);
                    }
                    if self.current_sig.is_none() {
                        continue;
                    }
                }
            }
        }
    }
}

impl<'s, S: RecordStore> Iterator for SigIter<'s, S> {
    type Item = Result<(Lid, u8), CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        match self.step() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.errored = true;
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One edge found by [`list_signatures`]: `from` certifies `to` at the
/// given recursion `depth`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SigEdge {
    pub from: Lid,
    pub to: Lid,
    pub depth: u32,
}

/// Recursively lists every signature edge reachable from `root`, depth
/// first, using [`SigIter`] at each directory and a [`LocalIdSet`] (spec
/// §4.1, component C3) to avoid reprinting a subtree already visited —
/// spec §9: "The signature lister uses an in-memory visited set (C3) keyed
/// by LID to avoid reprinting subtrees." Unlike the trust evaluator (spec
/// §4.6), there is no depth bound here; the visited set alone prevents
/// infinite recursion on a cyclic signature graph.
pub fn list_signatures<S: RecordStore>(store: &S, root: Lid) -> Result<Vec<SigEdge>, CoreError> {
    let mut visited = LocalIdSet::new();
    let mut edges = Vec::new();
    walk(store, root, 0, &mut visited, &mut edges)?;
    Ok(edges)
}

fn walk<S: RecordStore>(
    store: &S,
    dir_lid: Lid,
    depth: u32,
    visited: &mut LocalIdSet,
    edges: &mut Vec<SigEdge>,
) -> Result<(), CoreError> {
    if visited.insert(dir_lid, depth) {
        return Ok(());
    }
    for item in SigIter::new(store, dir_lid) {
        let (signer_lid, _flag) = item?;
        edges.push(SigEdge {
            from: signer_lid,
            to: dir_lid,
            depth,
        });
        if matches!(store.read(signer_lid, Some(RecordType::Dir)), Ok(_)) {
            walk(store, signer_lid, depth + 1, visited, edges)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use amplify::confinement::SmallVec;

    use super::*;
    use crate::record::{Dir, Sig, SigSlot, Uid};
    use crate::store::InMemoryStore;

    fn slot(lid: Lid) -> SigSlot { SigSlot { lid, flag: 0 } }

    #[test]
    fn non_dir_yields_empty_stream() {
        let store = InMemoryStore::new();
        let lid = store.new_recnum();
        assert!(SigIter::new(&store, lid).next().is_none());
    }

    #[test]
    fn walks_uids_then_slots_in_order() {
        let store = InMemoryStore::new();
        let dir_lid = store.new_recnum();
        let uid_lid = store.new_recnum();
        let sig_lid = store.new_recnum();
        let signer_a = Lid::new(100);
        let signer_b = Lid::new(101);

        store
            .write(Record::Dir(Dir {
                lid: dir_lid,
                uidlist: uid_lid,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Uid(Uid {
                recnum: uid_lid,
                lid: dir_lid,
                siglist: sig_lid,
                next: Lid::NONE,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Sig(Sig {
                recnum: sig_lid,
                lid: dir_lid,
                slots: SmallVec::try_from(vec![slot(Lid::NONE), slot(signer_a), slot(signer_b)]).unwrap(),
                next: Lid::NONE,
            }))
            .unwrap();

        let found: Vec<_> = SigIter::new(&store, dir_lid).map(|r| r.unwrap().0).collect();
        assert_eq!(found, vec![signer_a, signer_b]);
    }

    #[test]
    fn back_pointer_mismatch_is_corruption() {
        let store = InMemoryStore::new();
        let dir_lid = store.new_recnum();
        let other_dir_lid = store.new_recnum();
        let uid_lid = store.new_recnum();
        let sig_lid = store.new_recnum();

        store
            .write(Record::Dir(Dir {
                lid: dir_lid,
                uidlist: uid_lid,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Uid(Uid {
                recnum: uid_lid,
                lid: dir_lid,
                siglist: sig_lid,
                next: Lid::NONE,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Sig(Sig {
                recnum: sig_lid,
                lid: other_dir_lid,
                slots: Default::default(),
                next: Lid::NONE,
            }))
            .unwrap();

        let mut iter = SigIter::new(&store, dir_lid);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn list_signatures_stops_on_a_cycle() {
        let store = InMemoryStore::new();
        let dir_a = store.new_recnum();
        let dir_b = store.new_recnum();
        let uid_a = store.new_recnum();
        let uid_b = store.new_recnum();
        let sig_a = store.new_recnum();
        let sig_b = store.new_recnum();

        // A signs B, B signs A: a two-node cycle.
        store
            .write(Record::Dir(Dir {
                lid: dir_a,
                uidlist: uid_a,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Dir(Dir {
                lid: dir_b,
                uidlist: uid_b,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Uid(Uid {
                recnum: uid_a,
                lid: dir_a,
                siglist: sig_a,
                next: Lid::NONE,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Uid(Uid {
                recnum: uid_b,
                lid: dir_b,
                siglist: sig_b,
                next: Lid::NONE,
                ..Default::default()
            }))
            .unwrap();
        store
            .write(Record::Sig(Sig {
                recnum: sig_a,
                lid: dir_a,
                slots: SmallVec::try_from(vec![slot(dir_b)]).unwrap(),
                next: Lid::NONE,
            }))
            .unwrap();
        store
            .write(Record::Sig(Sig {
                recnum: sig_b,
                lid: dir_b,
                slots: SmallVec::try_from(vec![slot(dir_a)]).unwrap(),
                next: Lid::NONE,
            }))
            .unwrap();

        let edges = list_signatures(&store, dir_a).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0], SigEdge { from: dir_b, to: dir_a, depth: 0 });
        assert_eq!(edges[1], SigEdge { from: dir_a, to: dir_b, depth: 1 });
    }
}
