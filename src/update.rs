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

//! The update engine (spec §4.4–§4.4.2, component C6): rebuilds a
//! directory's sub-graph from an in-memory [`Keyblock`], verifying self-
//! and cross-signatures through [`Keyring`] and maintaining shadow
//! directories and hint lists for signers not yet known locally. By far the
//! largest component in the spec's own share breakdown (~40%).

use std::collections::HashSet;

use amplify::confinement::SmallVec;
use log::{debug, warn};

use crate::crypto::{Keyring, SigCheckResult, SignedSubject};
use crate::error::{CoreError, CorruptionError, RecoverableError};
use crate::ids::{Fingerprint, KeyId, Lid, NameHash, PubkeyAlgo};
use crate::keyblock::{Keyblock, Packet, SigClass, SignaturePacket, SubpktType};
use crate::record::{
    dirflag, uidflag, Dir, Hlst, Key, Pref, PrefItem, PrefType, Record, RecordType, Sdir, Sig, SigSlot, Uid,
    ITEMS_PER_HLST_RECORD, ITEMS_PER_PREF_RECORD,
};
use crate::store::RecordStore;

/// Outcome of [`Updater::update`]: whether the graph changed (spec §4.4
/// step 6, `modified_flag`).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct UpdateStats {
    pub modified: bool,
}

/// Outcome of [`Updater::insert`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct InsertOutcome {
    pub dir_lid: Lid,
    /// Set when this insert reused an existing SDIR's record number (spec
    /// §9 "Shadow->real promotion"): the promoted SDIR's former hint-list
    /// head, which the caller must feed to [`crate::hints::resolve`] before
    /// it is lost (spec §9 "resolve hint lists fully inside the same
    /// transaction as promotion").
    pub promoted_hintlist: Option<Lid>,
}

/// Binds a [`RecordStore`] and a [`Keyring`] together to run the update
/// algorithm. Holds no state of its own between calls — every method reads
/// and writes the store directly, matching spec §5's "single transaction
/// per update" model.
pub struct Updater<'s, S: RecordStore, K: Keyring> {
    store: &'s S,
    keyring: &'s K,
}

impl<'s, S: RecordStore, K: Keyring> Updater<'s, S, K> {
    pub fn new(store: &'s S, keyring: &'s K) -> Self { Updater { store, keyring } }

    /// Spec §4.4 secondary entry point: bootstraps a DIR for `pk`, reusing
    /// an existing SDIR's record number if one is already pending, then
    /// leaves it to the caller to run [`Updater::update`] with a full
    /// keyblock. Returns the DIR's LID; idempotent if the DIR already
    /// exists.
    pub fn insert(&self, pk: &K::Pk) -> Result<InsertOutcome, CoreError> {
        let fpr = self.keyring.fingerprint_from_pk(pk);
        if let Some(dir_lid) = self.store.search_dir_byfpr(&fpr) {
            return Ok(InsertOutcome {
                dir_lid,
                promoted_hintlist: None,
            });
        }
        let keyid = fpr.key_id();
        let algo = self.keyring.pubkey_algo(pk);

        let (dir_lid, promoted_hintlist) = match self.store.search_sdir(keyid, Some(algo)) {
            Some(sdir_lid) => {
                let old_hintlist = self.read_sdir(sdir_lid)?.hintlist;
                // Shadow -> real promotion (spec §9 "Shadow->real promotion"):
                // the record number is reused so every existing SIG slot
                // pointing at it stays valid without rewrite.
                self.store
                    .write(Record::Dir(Dir {
                        lid: sdir_lid,
                        ..Default::default()
                    }))
                    .map_err(|_| CorruptionError::WriteFailed(sdir_lid))?;
                (sdir_lid, Some(old_hintlist).filter(|h| !h.is_none()))
            }
            None => {
                let new_lid = self.store.new_recnum();
                self.store
                    .write(Record::Dir(Dir {
                        lid: new_lid,
                        ..Default::default()
                    }))
                    .map_err(|_| CorruptionError::WriteFailed(new_lid))?;
                (new_lid, None)
            }
        };

        let key_lid = self.store.new_recnum();
        self.store
            .write(Record::Key(Key {
                recnum: key_lid,
                lid: dir_lid,
                pubkey_algo: algo,
                fingerprint: fpr,
                next: Lid::NONE,
            }))
            .map_err(|_| CorruptionError::WriteFailed(key_lid))?;

        let mut dir = self.read_dir(dir_lid)?;
        dir.keylist = key_lid;
        self.write_dir(&dir)?;

        Ok(InsertOutcome {
            dir_lid,
            promoted_hintlist,
        })
    }

    fn read_dir(&self, lid: Lid) -> Result<Dir, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Dir)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_dir().expect("read enforced RecordType::Dir").clone())
    }

    fn write_dir(&self, dir: &Dir) -> Result<(), CoreError> {
        self.store
            .write(Record::Dir(dir.clone()))
            .map_err(|_| CorruptionError::WriteFailed(dir.lid).into())
    }

    fn read_key(&self, lid: Lid) -> Result<Key, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Key)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_key().expect("read enforced RecordType::Key").clone())
    }

    fn write_key(&self, key: &Key) -> Result<(), CoreError> {
        self.store
            .write(Record::Key(key.clone()))
            .map_err(|_| CorruptionError::WriteFailed(key.recnum).into())
    }

    fn read_uid(&self, lid: Lid) -> Result<Uid, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Uid)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_uid().expect("read enforced RecordType::Uid").clone())
    }

    fn write_uid(&self, uid: &Uid) -> Result<(), CoreError> {
        self.store
            .write(Record::Uid(uid.clone()))
            .map_err(|_| CorruptionError::WriteFailed(uid.recnum).into())
    }

    fn read_sig(&self, lid: Lid) -> Result<Sig, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Sig)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_sig().expect("read enforced RecordType::Sig").clone())
    }

    fn write_sig(&self, sig: &Sig) -> Result<(), CoreError> {
        self.store
            .write(Record::Sig(sig.clone()))
            .map_err(|_| CorruptionError::WriteFailed(sig.recnum).into())
    }

    fn read_sdir(&self, lid: Lid) -> Result<Sdir, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Sdir)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_sdir().expect("read enforced RecordType::Sdir").clone())
    }

    fn read_hlst(&self, lid: Lid) -> Result<Hlst, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Hlst)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_hlst().expect("read enforced RecordType::Hlst").clone())
    }

    fn write_hlst(&self, hlst: &Hlst) -> Result<(), CoreError> {
        self.store
            .write(Record::Hlst(hlst.clone()))
            .map_err(|_| CorruptionError::WriteFailed(hlst.recnum).into())
    }

    /// Whether `lid` currently names a DIR record (used by §4.4.1 step 2's
    /// "targets a present DIR" check).
    fn is_dir(&self, lid: Lid) -> bool { matches!(self.store.read(lid, Some(RecordType::Dir)), Ok(_)) }

    fn is_sdir(&self, lid: Lid) -> bool { matches!(self.store.read(lid, Some(RecordType::Sdir)), Ok(_)) }

    /// Spec §4.4: walk the keyblock packets, reconcile the DIR's sub-graph,
    /// sweep orphans, and report whether anything changed. Runs inside a
    /// single store transaction, cancelled on any error.
    pub fn update(&self, keyblock: &Keyblock<K::Pk, K::Sig>) -> Result<UpdateStats, CoreError> {
        let primary = keyblock.primary();
        let dir_lid = self
            .store
            .search_dir_byfpr(&primary.fingerprint)
            .ok_or(RecoverableError::NotFound)?;

        self.store.begin_transaction().map_err(|_| CorruptionError::ReadFailed(dir_lid))?;
        let result = self.update_inner(dir_lid, primary.fingerprint.key_id(), keyblock);
        match &result {
            Ok(_) => {
                self.store.end_transaction().map_err(|_| CorruptionError::WriteFailed(dir_lid))?;
            }
            Err(_) => {
                let _ = self.store.cancel_transaction();
            }
        }
        result
    }

    fn update_inner(
        &self,
        dir_lid: Lid,
        primary_keyid: KeyId,
        keyblock: &Keyblock<K::Pk, K::Sig>,
    ) -> Result<UpdateStats, CoreError> {
        let mut visited_keys: HashSet<Fingerprint> = HashSet::new();
        let mut visited_uids: HashSet<NameHash> = HashSet::new();
        let mut modified = false;

        let mut current_uid_lid: Option<Lid> = None;
        let mut current_uid_idx: Option<usize> = None;
        let mut uid_seq = 0usize;

        for packet in &keyblock.packets {
            match packet {
                Packet::PrimaryKey(kp) | Packet::Subkey(kp) => {
                    let (_key_lid, created) = self.match_or_create_key(dir_lid, kp.pubkey_algo, kp.fingerprint)?;
                    visited_keys.insert(kp.fingerprint);
                    modified |= created;
                    current_uid_lid = None;
                    current_uid_idx = None;
                }
                Packet::UserId(u) => {
                    let namehash = self.keyring.rmd160_hash_buffer(u.name.as_bytes());
                    let (uid_lid, created) = self.match_or_create_uid(dir_lid, namehash)?;
                    visited_uids.insert(namehash);
                    modified |= created;
                    current_uid_lid = Some(uid_lid);
                    current_uid_idx = Some(uid_seq);
                    uid_seq += 1;
                }
                Packet::Signature(sig) => {
                    let Some(uid_lid) = current_uid_lid else {
                        if !sig.class.valid_without_uid() {
                            debug!("signature class {:#04x} with no current UID, skipping", sig.class.0);
                        } else {
                            debug!(
                                "signature class {:#04x} acknowledged but not materialized (open question, spec §9)",
                                sig.class.0
                            );
                        }
                        continue;
                    };
                    if !sig.class.is_uid_cert() {
                        debug!(
                            "signature class {:#04x} acknowledged but not materialized (open question, spec §9)",
                            sig.class.0
                        );
                        continue;
                    }
                    let uid_idx = current_uid_idx.expect("set alongside current_uid_lid");
                    if sig.signer_keyid == primary_keyid {
                        modified |= self.handle_self_sig(uid_lid, uid_idx, keyblock, sig)?;
                    } else {
                        modified |= self.handle_cross_sig(dir_lid, uid_lid, uid_idx, keyblock, sig)?;
                    }
                }
            }
        }

        modified |= self.sweep_keylist(dir_lid, &visited_keys)?;
        modified |= self.sweep_uidlist(dir_lid, &visited_uids)?;

        if modified {
            let mut dir = self.read_dir(dir_lid)?;
            dir.clear_checked();
            self.write_dir(&dir)?;
        }

        Ok(UpdateStats { modified })
    }

    /// Spec §4.4 step 2: "append to the DIR's keylist on creation" —
    /// new keys land at the tail so walking from `dir.keylist` preserves
    /// keyblock packet order.
    fn match_or_create_key(&self, dir_lid: Lid, algo: PubkeyAlgo, fpr: Fingerprint) -> Result<(Lid, bool), CoreError> {
        let dir = self.read_dir(dir_lid)?;
        let mut cursor = dir.keylist;
        let mut tail: Option<Key> = None;
        while !cursor.is_none() {
            let key = self.read_key(cursor)?;
            if key.fingerprint == fpr {
                return Ok((cursor, false));
            }
            cursor = key.next;
            if cursor.is_none() {
                tail = Some(key);
            }
        }
        let key_lid = self.store.new_recnum();
        self.store
            .write(Record::Key(Key {
                recnum: key_lid,
                lid: dir_lid,
                pubkey_algo: algo,
                fingerprint: fpr,
                next: Lid::NONE,
            }))
            .map_err(|_| CorruptionError::WriteFailed(key_lid))?;
        match tail {
            Some(mut tail_key) => {
                tail_key.next = key_lid;
                self.write_key(&tail_key)?;
            }
            None => {
                let mut dir = dir;
                dir.keylist = key_lid;
                self.write_dir(&dir)?;
            }
        }
        Ok((key_lid, true))
    }

    /// Spec §4.4 step 2: "append to DIR's uidlist on creation" — new UIDs
    /// land at the tail so walking from `dir.uidlist` preserves keyblock
    /// packet order (spec §4.6's UID-list-order tie-break depends on this).
    fn match_or_create_uid(&self, dir_lid: Lid, namehash: NameHash) -> Result<(Lid, bool), CoreError> {
        let dir = self.read_dir(dir_lid)?;
        let mut cursor = dir.uidlist;
        let mut tail: Option<Uid> = None;
        while !cursor.is_none() {
            let uid = self.read_uid(cursor)?;
            if uid.namehash == namehash {
                return Ok((cursor, false));
            }
            cursor = uid.next;
            if cursor.is_none() {
                tail = Some(uid);
            }
        }
        let uid_lid = self.store.new_recnum();
        self.store
            .write(Record::Uid(Uid {
                recnum: uid_lid,
                lid: dir_lid,
                namehash,
                uidflags: 0,
                siglist: Lid::NONE,
                prefrec: Lid::NONE,
                next: Lid::NONE,
            }))
            .map_err(|_| CorruptionError::WriteFailed(uid_lid))?;
        match tail {
            Some(mut tail_uid) => {
                tail_uid.next = uid_lid;
                self.write_uid(&tail_uid)?;
            }
            None => {
                let mut dir = dir;
                dir.uidlist = uid_lid;
                self.write_dir(&dir)?;
            }
        }
        Ok((uid_lid, true))
    }

    /// Spec §4.4 step 2, self-sig branch.
    fn handle_self_sig(
        &self,
        uid_lid: Lid,
        uid_idx: usize,
        keyblock: &Keyblock<K::Pk, K::Sig>,
        sig: &SignaturePacket<K::Sig>,
    ) -> Result<bool, CoreError> {
        let mut uid = self.read_uid(uid_lid)?;
        if uid.is_checked() {
            return Ok(false);
        }
        let result = self.keyring.check_key_signature(keyblock, SignedSubject::UserId(uid_idx), sig);
        let mut flags = uid.flags();
        flags.insert(uidflag::CHECKED);
        match result {
            SigCheckResult::Valid { .. } => {
                flags.insert(uidflag::VALID);
                uid.set_flags(flags);
                self.write_uid(&uid)?;
                self.rebuild_prefs(&mut uid, keyblock, sig)?;
            }
            SigCheckResult::Invalid | SigCheckResult::NoPubkey => {
                uid.set_flags(flags);
                self.write_uid(&uid)?;
            }
        }
        Ok(true)
    }

    fn rebuild_prefs(
        &self,
        uid: &mut Uid,
        _keyblock: &Keyblock<K::Pk, K::Sig>,
        sig: &SignaturePacket<K::Sig>,
    ) -> Result<(), CoreError> {
        // Delete the old PREF chain before allocating the new one.
        let mut cursor = uid.prefrec;
        while !cursor.is_none() {
            let pref = self.read_pref(cursor)?;
            self.store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
            cursor = pref.next;
        }
        uid.prefrec = Lid::NONE;

        let mut items = Vec::new();
        for (subpkt, preftype) in [
            (SubpktType::Sym, PrefType::Sym),
            (SubpktType::Hash, PrefType::Hash),
            (SubpktType::Compr, PrefType::Compr),
        ] {
            if let Some(bytes) = self.keyring.parse_sig_subpkt2(sig, subpkt) {
                for algo in bytes {
                    items.push(PrefItem { preftype, algo });
                }
            }
        }

        // Processed back-to-front (last chunk first) so that the prepend
        // below builds the chain in forward order: the first PREF record
        // reachable from `uid.prefrec` holds the first `ITEMS_PER_PREF_RECORD`
        // items, per spec §4.4 step 2's "linked in order".
        let mut head = Lid::NONE;
        for chunk in items.chunks(ITEMS_PER_PREF_RECORD).rev() {
            let lid = self.store.new_recnum();
            let pref = Pref {
                recnum: lid,
                lid: uid.lid,
                items: SmallVec::try_from(chunk.to_vec()).expect("chunk bounded by ITEMS_PER_PREF_RECORD"),
                next: head,
            };
            self.store.write(Record::Pref(pref)).map_err(|_| CorruptionError::WriteFailed(lid))?;
            head = lid;
        }
        uid.prefrec = head;
        self.write_uid(uid)?;
        Ok(())
    }

    fn read_pref(&self, lid: Lid) -> Result<Pref, CoreError> {
        let rec = self.store.read(lid, Some(RecordType::Pref)).map_err(|_| CorruptionError::ReadFailed(lid))?;
        Ok(rec.as_pref().cloned().ok_or_else(|| CorruptionError::ReadFailed(lid))?)
    }

    /// Spec §4.4.1: cross-signature update.
    fn handle_cross_sig(
        &self,
        dir_lid: Lid,
        uid_lid: Lid,
        uid_idx: usize,
        keyblock: &Keyblock<K::Pk, K::Sig>,
        sig: &SignaturePacket<K::Sig>,
    ) -> Result<bool, CoreError> {
        let signer_keyid = sig.signer_keyid;
        let signer_algo = sig.signer_pubkey_algo;

        // Step 1: resolve the signer's LID.
        let pk_l = match self.keyring.get_pubkey(signer_keyid) {
            Some(signer_pk) => {
                let signer_fpr = self.keyring.fingerprint_from_pk(&signer_pk);
                self.store.search_dir_byfpr(&signer_fpr)
            }
            None => None,
        }
        .or_else(|| self.store.search_sdir(signer_keyid, Some(signer_algo)));

        let uid = self.read_uid(uid_lid)?;
        let mut cursor = uid.siglist;
        let mut found = false;
        let mut empty_slot: Option<(Lid, usize)> = None;
        let mut any_changed = false;

        // Step 2: walk existing SIG slots.
        while !cursor.is_none() {
            let mut sig_rec = self.read_sig(cursor)?;
            if sig_rec.lid != dir_lid {
                return Err(CorruptionError::SignatureOwnerMismatch {
                    owner: dir_lid,
                    found: sig_rec.lid,
                }
                .into());
            }
            let mut dirty = false;
            let mut slots: Vec<SigSlot> = sig_rec.slots.iter().copied().collect();
            for (idx, slot) in slots.iter_mut().enumerate() {
                if slot.is_deleted() {
                    if empty_slot.is_none() {
                        empty_slot = Some((cursor, idx));
                    }
                    continue;
                }
                if let Some(target) = pk_l {
                    if slot.lid == target {
                        if found {
                            // duplicate: zero it out.
                            *slot = SigSlot::default();
                            dirty = true;
                            continue;
                        }
                        found = true;
                    }
                }
                let mut flags = slot.flags();
                if !flags.contains(crate::record::sigflag::CHECKED) {
                    if self.is_dir(slot.lid) {
                        match self.verify_cross_sig(keyblock, uid_idx, slot.lid, sig) {
                            SigCheckResult::Valid { .. } => {
                                flags.insert(crate::record::sigflag::CHECKED);
                                flags.insert(crate::record::sigflag::VALID);
                            }
                            SigCheckResult::NoPubkey => {
                                flags.insert(crate::record::sigflag::CHECKED);
                                flags.insert(crate::record::sigflag::NOPUBKEY);
                            }
                            SigCheckResult::Invalid => {
                                flags.insert(crate::record::sigflag::CHECKED);
                            }
                        }
                        slot.set_flags(flags);
                        dirty = true;
                    } else if self.is_sdir(slot.lid) {
                        let sdir = self.read_sdir(slot.lid)?;
                        if sdir.keyid == signer_keyid && sdir.pubkey_algo == signer_algo {
                            flags.insert(crate::record::sigflag::NOPUBKEY);
                            slot.set_flags(flags);
                            dirty = true;
                        }
                    } else {
                        return Err(CorruptionError::DanglingSignatureTarget(slot.lid).into());
                    }
                }
            }
            if dirty {
                sig_rec.slots = SmallVec::try_from(slots).expect("same length as before");
                self.write_sig(&sig_rec)?;
                any_changed = true;
            }
            cursor = sig_rec.next;
        }

        // Step 3: insert a new slot if no match was found.
        if !found {
            let (target_lid, flag) = match pk_l {
                None => {
                    let sdir_lid = self.create_shadow_dir(signer_keyid, signer_algo, dir_lid)?;
                    (sdir_lid, crate::record::sigflag::NOPUBKEY)
                }
                Some(lid) => match self.verify_cross_sig(keyblock, uid_idx, lid, sig) {
                    SigCheckResult::Valid { .. } => (lid, crate::record::sigflag::CHECKED | crate::record::sigflag::VALID),
                    SigCheckResult::NoPubkey => {
                        let sdir_lid = self.create_shadow_dir(signer_keyid, signer_algo, dir_lid)?;
                        (sdir_lid, crate::record::sigflag::NOPUBKEY)
                    }
                    SigCheckResult::Invalid => (lid, crate::record::sigflag::CHECKED),
                },
            };
            let new_slot = SigSlot { lid: target_lid, flag };
            self.place_slot(uid_lid, empty_slot, new_slot)?;
            any_changed = true;
        }

        Ok(any_changed)
    }

    fn verify_cross_sig(
        &self,
        keyblock: &Keyblock<K::Pk, K::Sig>,
        uid_idx: usize,
        _signer_dir_lid: Lid,
        sig: &SignaturePacket<K::Sig>,
    ) -> SigCheckResult {
        self.keyring.check_key_signature(keyblock, SignedSubject::UserId(uid_idx), sig)
    }

    fn place_slot(&self, uid_lid: Lid, reuse: Option<(Lid, usize)>, new_slot: SigSlot) -> Result<(), CoreError> {
        if let Some((sig_lid, idx)) = reuse {
            let mut sig_rec = self.read_sig(sig_lid)?;
            let mut slots: Vec<SigSlot> = sig_rec.slots.iter().copied().collect();
            slots[idx] = new_slot;
            sig_rec.slots = SmallVec::try_from(slots).expect("same length as before");
            self.write_sig(&sig_rec)?;
            return Ok(());
        }

        let mut uid = self.read_uid(uid_lid)?;
        let sig_lid = self.store.new_recnum();
        let mut slots = vec![SigSlot::default(); crate::record::SIGS_PER_RECORD];
        slots[0] = new_slot;
        let sig_rec = Sig {
            recnum: sig_lid,
            lid: uid.lid,
            slots: SmallVec::try_from(slots).expect("fixed at SIGS_PER_RECORD"),
            next: uid.siglist,
        };
        self.store.write(Record::Sig(sig_rec)).map_err(|_| CorruptionError::WriteFailed(sig_lid))?;
        uid.siglist = sig_lid;
        self.write_uid(&uid)?;
        Ok(())
    }

    /// Spec §4.4.2 `create_shadow_dir`.
    fn create_shadow_dir(&self, keyid: KeyId, algo: PubkeyAlgo, signed_lid: Lid) -> Result<Lid, CoreError> {
        let sdir_lid = match self.store.search_sdir(keyid, Some(algo)) {
            Some(lid) => lid,
            None => {
                let lid = self.store.new_recnum();
                self.store
                    .write(Record::Sdir(Sdir {
                        lid,
                        keyid,
                        pubkey_algo: algo,
                        hintlist: Lid::NONE,
                    }))
                    .map_err(|_| CorruptionError::WriteFailed(lid))?;
                lid
            }
        };

        let sdir = self.read_sdir(sdir_lid)?;
        let mut cursor = sdir.hintlist;
        let mut free_slot: Option<(Lid, usize)> = None;
        while !cursor.is_none() {
            let hlst = self.read_hlst(cursor)?;
            for (idx, &rnum) in hlst.rnum.iter().enumerate() {
                if rnum == signed_lid {
                    return Ok(sdir_lid);
                }
                if rnum.is_none() && free_slot.is_none() {
                    free_slot = Some((cursor, idx));
                }
            }
            cursor = hlst.next;
        }

        match free_slot {
            Some((hlst_lid, idx)) => {
                let mut hlst = self.read_hlst(hlst_lid)?;
                let mut slots: Vec<Lid> = hlst.rnum.iter().copied().collect();
                slots[idx] = signed_lid;
                hlst.rnum = SmallVec::try_from(slots).expect("same length as before");
                self.write_hlst(&hlst)?;
            }
            None => {
                let hlst_lid = self.store.new_recnum();
                let mut slots = vec![Lid::NONE; ITEMS_PER_HLST_RECORD];
                slots[0] = signed_lid;
                let hlst = Hlst {
                    recnum: hlst_lid,
                    lid: sdir_lid,
                    rnum: SmallVec::try_from(slots).expect("fixed at ITEMS_PER_HLST_RECORD"),
                    next: sdir.hintlist,
                };
                self.store.write(Record::Hlst(hlst)).map_err(|_| CorruptionError::WriteFailed(hlst_lid))?;
                let mut sdir = sdir;
                sdir.hintlist = hlst_lid;
                self.store
                    .write(Record::Sdir(sdir))
                    .map_err(|_| CorruptionError::WriteFailed(sdir_lid))?;
            }
        }

        Ok(sdir_lid)
    }

    /// Spec §4.4 step 3: sweep the keylist, deleting any KEY not visited.
    fn sweep_keylist(&self, dir_lid: Lid, visited: &HashSet<Fingerprint>) -> Result<bool, CoreError> {
        let dir = self.read_dir(dir_lid)?;
        let mut kept = Vec::new();
        let mut cursor = dir.keylist;
        let mut changed = false;
        while !cursor.is_none() {
            let key = self.read_key(cursor)?;
            let next = key.next;
            if visited.contains(&key.fingerprint) {
                kept.push(cursor);
            } else {
                self.store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
                changed = true;
            }
            cursor = next;
        }
        if changed {
            self.relink_keys(dir_lid, &kept)?;
        }
        Ok(changed)
    }

    fn relink_keys(&self, dir_lid: Lid, kept: &[Lid]) -> Result<(), CoreError> {
        let mut next = Lid::NONE;
        for &lid in kept.iter().rev() {
            let mut key = self.read_key(lid)?;
            key.next = next;
            self.store.write(Record::Key(key)).map_err(|_| CorruptionError::WriteFailed(lid))?;
            next = lid;
        }
        let mut dir = self.read_dir(dir_lid)?;
        dir.keylist = next;
        self.write_dir(&dir)
    }

    /// Spec §4.4 step 4: sweep the uidlist, deleting unvisited UIDs and
    /// their PREF/SIG chains.
    fn sweep_uidlist(&self, dir_lid: Lid, visited: &HashSet<NameHash>) -> Result<bool, CoreError> {
        let dir = self.read_dir(dir_lid)?;
        let mut kept = Vec::new();
        let mut cursor = dir.uidlist;
        let mut changed = false;
        while !cursor.is_none() {
            let uid = self.read_uid(cursor)?;
            let next = uid.next;
            if visited.contains(&uid.namehash) {
                kept.push(cursor);
            } else {
                self.delete_pref_chain(uid.prefrec)?;
                self.delete_sig_chain(uid.siglist)?;
                self.store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
                changed = true;
            }
            cursor = next;
        }
        if changed {
            self.relink_uids(dir_lid, &kept)?;
        }
        Ok(changed)
    }

    fn relink_uids(&self, dir_lid: Lid, kept: &[Lid]) -> Result<(), CoreError> {
        let mut next = Lid::NONE;
        for &lid in kept.iter().rev() {
            let mut uid = self.read_uid(lid)?;
            uid.next = next;
            self.write_uid(&uid)?;
            next = lid;
        }
        let mut dir = self.read_dir(dir_lid)?;
        dir.uidlist = next;
        self.write_dir(&dir)
    }

    fn delete_pref_chain(&self, head: Lid) -> Result<(), CoreError> {
        let mut cursor = head;
        while !cursor.is_none() {
            let pref = self.read_pref(cursor)?;
            self.store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
            cursor = pref.next;
        }
        Ok(())
    }

    fn delete_sig_chain(&self, head: Lid) -> Result<(), CoreError> {
        let mut cursor = head;
        while !cursor.is_none() {
            let sig = self.read_sig(cursor)?;
            self.store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
            cursor = sig.next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ristretto::{RistrettoKeyring, RistrettoSk};
    use crate::keyblock::{KeyPacket, SigClass, UserIdPacket};
    use crate::store::InMemoryStore;

    fn make_keyblock_with_self_sig(
        keyring: &RistrettoKeyring,
        sk: &RistrettoSk,
        name: &str,
    ) -> Keyblock<crate::crypto::ristretto::RistrettoPk, crate::crypto::ristretto::RistrettoSig> {
        let pk = sk.public_key();
        let fpr = pk.fingerprint();
        let mut kb = Keyblock::new();
        kb.push_primary(KeyPacket {
            pk,
            pubkey_algo: crate::crypto::ristretto::PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr,
            timestamp: 0,
            expiredate: 0,
        });
        kb.push_uid(name);
        let digest = crate::crypto::ristretto::signing_digest(&fpr, name.as_bytes());
        kb.push_sig(SignaturePacket {
            signer_keyid: fpr.key_id(),
            signer_pubkey_algo: crate::crypto::ristretto::PUBKEY_ALGO_RISTRETTO,
            class: SigClass::UID_POSITIVE,
            sig: sk.sign(digest),
            subpackets: Default::default(),
        });
        keyring.publish(kb.clone());
        kb
    }

    #[test]
    fn insert_then_update_creates_checked_valid_uid() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        keyring.add_secret(sk);
        let sk = keyring.enum_secret_keys().remove(0);

        let kb = make_keyblock_with_self_sig(&keyring, &sk, "alice@example.com");
        let updater = Updater::new(&store, &keyring);
        let dir_lid = updater.insert(&sk.public_key()).unwrap().dir_lid;
        let stats = updater.update(&kb).unwrap();
        assert!(stats.modified);

        let dir = updater.read_dir(dir_lid).unwrap();
        let uid = updater.read_uid(dir.uidlist).unwrap();
        assert!(uid.is_checked());
        assert!(uid.flags().contains(uidflag::VALID));
    }

    #[test]
    fn update_without_insert_fails_not_found() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        let kb = make_keyblock_with_self_sig(&keyring, &sk, "bob@example.com");
        let updater = Updater::new(&store, &keyring);
        assert!(updater.update(&kb).is_err());
    }

    #[test]
    fn repeated_update_is_idempotent_on_keylist() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        keyring.add_secret(sk);
        let sk = keyring.enum_secret_keys().remove(0);
        let kb = make_keyblock_with_self_sig(&keyring, &sk, "carol@example.com");
        let updater = Updater::new(&store, &keyring);
        let dir_lid = updater.insert(&sk.public_key()).unwrap().dir_lid;
        updater.update(&kb).unwrap();
        updater.update(&kb).unwrap();

        let dir = updater.read_dir(dir_lid).unwrap();
        let mut count = 0;
        let mut cursor = dir.keylist;
        while !cursor.is_none() {
            let key = updater.read_key(cursor).unwrap();
            count += 1;
            cursor = key.next;
        }
        assert_eq!(count, 1);
    }
}
