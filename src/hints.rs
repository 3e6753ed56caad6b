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

//! The hint-list resolver (spec §4.5, component C7): run once an SDIR has
//! been promoted to a DIR, to retroactively verify every signature that was
//! deferred while the signer was unknown.

use amplify::confinement::SmallVec;
use log::{error, warn};

use crate::crypto::{Keyring, SigCheckResult, SignedSubject};
use crate::error::{CoreError, CorruptionError, RecoverableError};
use crate::ids::Lid;
use crate::keyblock::{Keyblock, Packet};
use crate::record::{sigflag, Dir, Hlst, Sig, Uid};
use crate::record::RecordType;
use crate::store::RecordStore;

fn read_dir<S: RecordStore>(store: &S, lid: Lid) -> Result<Dir, CoreError> {
    let rec = store.read(lid, Some(RecordType::Dir)).map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_dir().expect("read enforced RecordType::Dir").clone())
}

fn read_uid<S: RecordStore>(store: &S, lid: Lid) -> Result<Uid, CoreError> {
    let rec = store.read(lid, Some(RecordType::Uid)).map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_uid().expect("read enforced RecordType::Uid").clone())
}

fn read_sig<S: RecordStore>(store: &S, lid: Lid) -> Result<Sig, CoreError> {
    let rec = store.read(lid, Some(RecordType::Sig)).map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_sig().expect("read enforced RecordType::Sig").clone())
}

fn read_hlst<S: RecordStore>(store: &S, lid: Lid) -> Result<Hlst, CoreError> {
    let rec = store.read(lid, Some(RecordType::Hlst)).map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_hlst().expect("read enforced RecordType::Hlst").clone())
}

/// Finds the positional index (among `UserId` packets only) of the packet
/// whose name hashes to `namehash`, matching the convention
/// [`crate::update::Updater`] uses for [`SignedSubject::UserId`].
fn find_uid_index<K: Keyring>(keyring: &K, keyblock: &Keyblock<K::Pk, K::Sig>, namehash: crate::ids::NameHash) -> Option<usize> {
    let mut idx = 0;
    for packet in &keyblock.packets {
        if let Packet::UserId(u) = packet {
            if keyring.rmd160_hash_buffer(u.name.as_bytes()) == namehash {
                return Some(idx);
            }
            idx += 1;
        }
    }
    None
}

/// Finds the signature packet certifying the `uid_idx`-th user id, signed by
/// `signer_keyid`, with a certification class (spec §4.5 step 3).
fn find_uid_cert<'k, K: Keyring>(
    keyblock: &'k Keyblock<K::Pk, K::Sig>,
    uid_idx: usize,
    signer_keyid: crate::ids::KeyId,
) -> Option<&'k crate::keyblock::SignaturePacket<K::Sig>> {
    let mut seen = 0usize;
    let mut in_target_uid = false;
    for packet in &keyblock.packets {
        match packet {
            Packet::UserId(_) => {
                in_target_uid = seen == uid_idx;
                seen += 1;
            }
            Packet::PrimaryKey(_) | Packet::Subkey(_) => in_target_uid = false,
            Packet::Signature(sig) if in_target_uid && sig.class.is_uid_cert() && sig.signer_keyid == signer_keyid => {
                return Some(sig);
            }
            Packet::Signature(_) => {}
        }
    }
    None
}

/// Spec §4.5: for every DIR named in `hintlist_head`'s chain, re-verify the
/// signature slot that targets `hint_owner` (the just-promoted key).
pub fn resolve<S, K>(store: &S, keyring: &K, hint_owner: Lid, hintlist_head: Lid) -> Result<(), CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    let mut cursor = hintlist_head;
    while !cursor.is_none() {
        let hlst = read_hlst(store, cursor)?;
        for &hinted_dir in hlst.rnum.iter() {
            if hinted_dir.is_none() {
                continue;
            }
            if let Err(err) = resolve_one(store, keyring, hint_owner, hinted_dir) {
                if err.is_corrupt() {
                    return Err(err);
                }
                warn!("hint resolution for {hinted_dir} skipped: {err}");
            }
        }
        store.delete(cursor).map_err(|_| CorruptionError::WriteFailed(cursor))?;
        cursor = hlst.next;
    }
    store.sync().map_err(|_| CorruptionError::SyncFailed)?;
    Ok(())
}

fn resolve_one<S, K>(store: &S, keyring: &K, hint_owner: Lid, hinted_dir: Lid) -> Result<(), CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    if hinted_dir == hint_owner {
        error!("refusing to resolve a hint pointing a key at itself ({hinted_dir})");
        return Ok(());
    }

    let dir = read_dir(store, hinted_dir)?;
    if dir.keylist.is_none() {
        return Err(CorruptionError::DirectoryWithoutKeys(hinted_dir).into());
    }

    let key_rec = store
        .read(dir.keylist, Some(RecordType::Key))
        .map_err(|_| CorruptionError::ReadFailed(dir.keylist))?;
    let primary = key_rec.as_key().expect("read enforced RecordType::Key");
    let keyblock = keyring.get_keyblock_byfpr(&primary.fingerprint).ok_or(RecoverableError::NotFound)?;

    let signer_dir = read_dir(store, hint_owner)?;
    if signer_dir.keylist.is_none() {
        return Err(CorruptionError::DirectoryWithoutKeys(hint_owner).into());
    }
    let signer_key_rec = store
        .read(signer_dir.keylist, Some(RecordType::Key))
        .map_err(|_| CorruptionError::ReadFailed(signer_dir.keylist))?;
    let signer_keyid = signer_key_rec.as_key().expect("read enforced RecordType::Key").fingerprint.key_id();

    let mut uid_cursor = dir.uidlist;
    while !uid_cursor.is_none() {
        let uid = read_uid(store, uid_cursor)?;
        let Some(uid_idx) = find_uid_index(keyring, &keyblock, uid.namehash) else {
            uid_cursor = uid.next;
            continue;
        };

        let mut sig_cursor = uid.siglist;
        while !sig_cursor.is_none() {
            let mut sig_rec = read_sig(store, sig_cursor)?;
            if sig_rec.lid != hinted_dir {
                return Err(CorruptionError::SignatureOwnerMismatch {
                    owner: hinted_dir,
                    found: sig_rec.lid,
                }
                .into());
            }
            let mut slots: Vec<_> = sig_rec.slots.iter().copied().collect();
            let mut dirty = false;
            for slot in slots.iter_mut() {
                if slot.is_deleted() || slot.lid != hint_owner {
                    continue;
                }
                let mut flags = slot.flags();
                if flags.contains(sigflag::CHECKED) {
                    warn!("hint slot for {hinted_dir} already checked, skipping re-verification");
                    continue;
                }
                if !flags.contains(sigflag::NOPUBKEY) {
                    warn!("hint slot for {hinted_dir} was not flagged NOPUBKEY; resolving anyway");
                }
                flags.remove(sigflag::NOPUBKEY);

                if signer_keyid == primary.fingerprint.key_id() {
                    error!("refusing a self-signature surfaced through hint resolution for {hinted_dir}");
                    flags.insert(sigflag::CHECKED);
                    slot.set_flags(flags);
                    dirty = true;
                    continue;
                }
                let Some(sig_pkt) = find_uid_cert::<K>(&keyblock, uid_idx, signer_keyid) else {
                    continue;
                };

                match keyring.check_key_signature(&keyblock, SignedSubject::UserId(uid_idx), sig_pkt) {
                    SigCheckResult::Valid { .. } => {
                        flags.insert(sigflag::CHECKED);
                        flags.insert(sigflag::VALID);
                    }
                    SigCheckResult::NoPubkey => {
                        flags.insert(sigflag::CHECKED);
                        flags.insert(sigflag::NOPUBKEY);
                    }
                    SigCheckResult::Invalid => {
                        flags.insert(sigflag::CHECKED);
                    }
                }
                slot.set_flags(flags);
                dirty = true;
            }
            if dirty {
                sig_rec.slots = SmallVec::try_from(slots).expect("same length as before");
                store.write(crate::record::Record::Sig(sig_rec)).map_err(|_| CorruptionError::WriteFailed(sig_cursor))?;
            }
            sig_cursor = sig_rec.next;
        }
        uid_cursor = uid.next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ristretto::{RistrettoKeyring, RistrettoSk, PUBKEY_ALGO_RISTRETTO};
    use crate::keyblock::{KeyPacket, SigClass, SignaturePacket};
    use crate::record::{Record, Sdir};
    use crate::store::InMemoryStore;
    use crate::update::Updater;

    #[test]
    fn resolve_drains_hintlist_and_checks_slot() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();

        // B, whose UID will carry a deferred cross-sig from C.
        let sk_b = RistrettoSk::generate();
        let pk_b = sk_b.public_key();
        let fpr_b = pk_b.fingerprint();
        let sk_c = RistrettoSk::generate();
        let pk_c = sk_c.public_key();
        let fpr_c = pk_c.fingerprint();

        let updater = Updater::new(&store, &keyring);
        let dir_b = updater.insert(&pk_b).unwrap().dir_lid;

        let mut kb_b = Keyblock::new();
        kb_b.push_primary(KeyPacket {
            pk: pk_b,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_b,
            timestamp: 0,
            expiredate: 0,
        });
        kb_b.push_uid("b@example.com");
        let digest = crate::crypto::ristretto::signing_digest(&fpr_b, b"b@example.com");
        kb_b.push_sig(SignaturePacket {
            signer_keyid: fpr_c.key_id(),
            signer_pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            class: SigClass::UID_POSITIVE,
            sig: sk_c.sign(digest),
            subpackets: Default::default(),
        });
        keyring.publish(kb_b.clone());
        updater.update(&kb_b).unwrap();

        let dir = read_dir(&store, dir_b).unwrap();
        let uid = read_uid(&store, dir.uidlist).unwrap();
        let sig_before = read_sig(&store, uid.siglist).unwrap();
        let slot = sig_before.slots.iter().find(|s| !s.is_deleted()).unwrap();
        assert!(slot.flags().contains(sigflag::NOPUBKEY));
        let sdir_c = slot.lid;
        assert!(matches!(store.read(sdir_c, None), Ok(Record::Sdir(_))));
        let hintlist = match store.read(sdir_c, Some(RecordType::Sdir)).unwrap() {
            Record::Sdir(Sdir { hintlist, .. }) => hintlist,
            _ => unreachable!(),
        };
        assert!(!hintlist.is_none());

        // Now C arrives: insert promotes the SDIR in place.
        let outcome = updater.insert(&pk_c).unwrap();
        assert_eq!(outcome.dir_lid, sdir_c);
        assert_eq!(outcome.promoted_hintlist, Some(hintlist));

        let mut kb_c = Keyblock::new();
        kb_c.push_primary(KeyPacket {
            pk: pk_c,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_c,
            timestamp: 0,
            expiredate: 0,
        });
        keyring.publish(kb_c);

        resolve(&store, &keyring, outcome.dir_lid, hintlist).unwrap();

        let sig_after = read_sig(&store, uid.siglist).unwrap();
        let slot_after = sig_after.slots.iter().find(|s| s.lid == sdir_c).unwrap();
        assert!(slot_after.flags().contains(sigflag::CHECKED));
        assert!(slot_after.flags().contains(sigflag::VALID));
    }
}
