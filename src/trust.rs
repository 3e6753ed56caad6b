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

//! The trust evaluator (spec §4.6, component C8): a bounded recursive walk
//! of the signature graph that aggregates marginal and complete
//! certifications into a final trust verdict.

use log::debug;

use crate::crypto::Keyring;
use crate::error::{CoreError, CorruptionError};
use crate::ids::Lid;
use crate::keyblock::Keyblock;
use crate::record::{sigflag, Dir, TrustLevel};
use crate::store::RecordStore;
use crate::ultimate::UltimateRegistry;
use crate::update::Updater;

/// Trust-computation thresholds (spec §4.6). Defaults match the classic
/// web-of-trust values the algorithm presumes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TrustOptions {
    pub completes_needed: u32,
    pub marginals_needed: u32,
    pub max_cert_depth: u32,
}

impl Default for TrustOptions {
    fn default() -> Self {
        TrustOptions {
            completes_needed: 1,
            marginals_needed: 3,
            max_cert_depth: 5,
        }
    }
}

/// Result of [`check_trust`]: the computed level, with the revoked flag
/// folded in as spec §4.6's final step describes ("set `TRUST_FLAG_REVOKED`
/// on the returned level").
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TrustResult {
    pub level: TrustLevel,
    pub revoked: bool,
}

impl TrustResult {
    pub fn display_code(self) -> char { self.level.display_code(self.revoked) }

    fn masked(level: TrustLevel, revoked: bool) -> Self { TrustResult { level, revoked } }
}

/// One hop of a [`list_trust_path`] report.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TrustPathHop {
    pub dir_lid: Lid,
    pub depth: u32,
    /// Column the hop is printed at by the teacher's listing convention:
    /// `depth * indent_width`, tracked incrementally rather than
    /// recomputed, mirroring the "column-width counter" spec §9 flags.
    pub column: u32,
    pub level: TrustLevel,
}

/// Output of [`list_trust_path`].
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct TrustPath {
    pub hops: Vec<TrustPathHop>,
}

/// Spec §4.6 public entry point. Runs the key through the pre-flight policy
/// checks, then [`verify_key`], folding in the revoked flag.
pub fn check_trust<S, K>(
    store: &S,
    keyring: &K,
    registry: &UltimateRegistry,
    opts: &TrustOptions,
    pk: &K::Pk,
    now: u64,
) -> Result<TrustResult, CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    let fpr = keyring.fingerprint_from_pk(pk);
    let dir_lid = match store.search_dir_byfpr(&fpr) {
        Some(lid) => lid,
        None => {
            let updater = Updater::new(store, keyring);
            updater.insert(pk)?.dir_lid
        }
    };
    let dir = read_dir(store, dir_lid)?;

    let keyblock = keyring.get_keyblock_byfpr(&fpr);
    if let Some(kb) = &keyblock {
        let primary = kb.primary();
        if primary.timestamp > now {
            return Err(CoreError::TimeConflict);
        }
        if primary.expiredate != 0 && primary.expiredate <= now {
            return Ok(TrustResult::masked(TrustLevel::Expired, dir.is_revoked()));
        }
    }

    let level = verify_key(store, keyring, registry, opts, 1, &dir)?;
    Ok(TrustResult::masked(level, dir.is_revoked()))
}

fn read_dir<S: RecordStore>(store: &S, lid: Lid) -> Result<Dir, CoreError> {
    let rec = store
        .read(lid, Some(crate::record::RecordType::Dir))
        .map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_dir().expect("read enforced RecordType::Dir").clone())
}

/// Spec §4.6 steps 1-5: the bounded recursive walk.
fn verify_key<S, K>(
    store: &S,
    keyring: &K,
    registry: &UltimateRegistry,
    opts: &TrustOptions,
    depth: u32,
    dir: &Dir,
) -> Result<TrustLevel, CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    if depth >= opts.max_cert_depth {
        return Ok(TrustLevel::Undefined);
    }
    if registry.contains(dir.lid) {
        return Ok(TrustLevel::Ultimate);
    }
    if dir.keylist.is_none() {
        return Err(CorruptionError::DirectoryWithoutKeys(dir.lid).into());
    }

    let mut marginal = 0u32;
    let mut fully = 0u32;

    let mut uid_cursor = dir.uidlist;
    while !uid_cursor.is_none() {
        let uid = read_uid(store, uid_cursor)?;
        let mut sig_cursor = uid.siglist;
        while !sig_cursor.is_none() {
            let sig = read_sig(store, sig_cursor)?;
            for slot in sig.slots.iter() {
                if slot.is_deleted() {
                    continue;
                }
                let flags = slot.flags();
                if !flags.contains(sigflag::CHECKED)
                    || !flags.contains(sigflag::VALID)
                    || flags.contains(sigflag::EXPIRED)
                    || flags.contains(sigflag::REVOKED)
                {
                    continue;
                }

                let signer_dir = match read_dir(store, slot.lid) {
                    Ok(d) => d,
                    Err(err) if err.is_corrupt() => return Err(err),
                    Err(_) => continue,
                };
                let signer_ownertrust = TrustLevel::from_masked(signer_dir.ownertrust).min(TrustLevel::Fully);

                let nt = verify_key(store, keyring, registry, opts, depth + 1, &signer_dir)?;
                if nt < TrustLevel::Marginal {
                    continue;
                }
                if nt == TrustLevel::Ultimate {
                    // First hop from an ultimate root: spec §4.6 step 4
                    // returns the signer's (clamped) owner-trust as the
                    // verdict even when that owner-trust is UNKNOWN (spec §9
                    // open question: mirrored as-is, not "corrected" to
                    // something more intuitive).
                    return Ok(signer_ownertrust);
                }
                if nt >= TrustLevel::Fully {
                    fully += 1;
                }
                if nt >= TrustLevel::Marginal {
                    marginal += 1;
                }
                if fully >= opts.completes_needed || marginal >= opts.marginals_needed {
                    return Ok(TrustLevel::Fully);
                }
            }
            sig_cursor = sig.next;
        }
        uid_cursor = uid.next;
    }

    if marginal > 0 {
        Ok(TrustLevel::Marginal)
    } else {
        Ok(TrustLevel::Undefined)
    }
}

fn read_uid<S: RecordStore>(store: &S, lid: Lid) -> Result<crate::record::Uid, CoreError> {
    let rec = store
        .read(lid, Some(crate::record::RecordType::Uid))
        .map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_uid().expect("read enforced RecordType::Uid").clone())
}

fn read_sig<S: RecordStore>(store: &S, lid: Lid) -> Result<crate::record::Sig, CoreError> {
    let rec = store
        .read(lid, Some(crate::record::RecordType::Sig))
        .map_err(|_| CorruptionError::ReadFailed(lid))?;
    Ok(rec.as_sig().expect("read enforced RecordType::Sig").clone())
}

/// The "second trust walker variant" spec §9 calls out: a listing of the
/// certification path(s) reaching `dir_lid`, annotated with the trust level
/// computed at each hop. The original tracked a column-width counter for
/// indentation that was read before being initialized; here it starts at 0
/// (spec §9: "treat this as a bug to correct... rather than to reproduce").
pub fn list_trust_path<S, K>(
    store: &S,
    keyring: &K,
    registry: &UltimateRegistry,
    opts: &TrustOptions,
    dir_lid: Lid,
) -> Result<TrustPath, CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    let mut path = TrustPath::default();
    let mut column = 0u32;
    walk_trust_path(store, keyring, registry, opts, 1, dir_lid, &mut column, &mut path)?;
    Ok(path)
}

fn walk_trust_path<S, K>(
    store: &S,
    keyring: &K,
    registry: &UltimateRegistry,
    opts: &TrustOptions,
    depth: u32,
    dir_lid: Lid,
    column: &mut u32,
    path: &mut TrustPath,
) -> Result<TrustLevel, CoreError>
where
    S: RecordStore,
    K: Keyring,
{
    let dir = read_dir(store, dir_lid)?;
    let level = if depth >= opts.max_cert_depth {
        TrustLevel::Undefined
    } else if registry.contains(dir_lid) {
        TrustLevel::Ultimate
    } else {
        verify_key(store, keyring, registry, opts, depth, &dir)?
    };

    path.hops.push(TrustPathHop {
        dir_lid,
        depth,
        column: *column,
        level,
    });
    *column += depth;

    if level == TrustLevel::Ultimate || depth >= opts.max_cert_depth {
        return Ok(level);
    }

    let mut uid_cursor = dir.uidlist;
    while !uid_cursor.is_none() {
        let uid = read_uid(store, uid_cursor)?;
        let mut sig_cursor = uid.siglist;
        while !sig_cursor.is_none() {
            let sig = read_sig(store, sig_cursor)?;
            for slot in sig.slots.iter() {
                if slot.is_deleted() || !slot.flags().contains(sigflag::VALID) {
                    continue;
                }
                if matches!(store.read(slot.lid, Some(crate::record::RecordType::Dir)), Ok(_)) {
                    walk_trust_path(store, keyring, registry, opts, depth + 1, slot.lid, column, path)?;
                } else {
                    debug!("list-trust-path: slot at {dir_lid} targets non-DIR {}, skipping", slot.lid);
                }
            }
            sig_cursor = sig.next;
        }
        uid_cursor = uid.next;
    }

    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ristretto::{RistrettoKeyring, RistrettoSk, PUBKEY_ALGO_RISTRETTO};
    use crate::keyblock::{KeyPacket, SigClass, SignaturePacket};
    use crate::store::InMemoryStore;

    fn fresh_dir_with_ownertrust<S: RecordStore>(store: &S, lid: Lid, ownertrust: u8) {
        let mut dir = super::read_dir(store, lid).unwrap();
        dir.ownertrust = ownertrust;
        store.write(crate::record::Record::Dir(dir)).unwrap();
    }

    #[test]
    fn ultimate_root_short_circuits() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        keyring.add_secret(sk);
        let sk = keyring.enum_secret_keys().remove(0);
        let pk = sk.public_key();

        let updater = Updater::new(&store, &keyring);
        let dir_lid = updater.insert(&pk).unwrap().dir_lid;
        let mut registry = UltimateRegistry::new();
        registry.register(dir_lid);

        let result = check_trust(&store, &keyring, &registry, &TrustOptions::default(), &pk, 0).unwrap();
        assert_eq!(result.level, TrustLevel::Ultimate);
    }

    #[test]
    fn cross_signed_key_reaches_fully_when_signer_is_ultimate_and_trusted() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk_a = RistrettoSk::generate();
        keyring.add_secret(sk_a);
        let sk_a = keyring.enum_secret_keys().remove(0);
        let pk_a = sk_a.public_key();
        let fpr_a = pk_a.fingerprint();

        let updater = Updater::new(&store, &keyring);
        let dir_a = updater.insert(&pk_a).unwrap().dir_lid;
        let mut registry = UltimateRegistry::new();
        registry.register(dir_a);
        fresh_dir_with_ownertrust(&store, dir_a, TrustLevel::Fully as u8);

        let mut kb_a = Keyblock::new();
        kb_a.push_primary(KeyPacket {
            pk: pk_a,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_a,
            timestamp: 0,
            expiredate: 0,
        });
        keyring.publish(kb_a);

        let sk_b = RistrettoSk::generate();
        let pk_b = sk_b.public_key();
        let fpr_b = pk_b.fingerprint();
        updater.insert(&pk_b).unwrap();

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
            signer_keyid: fpr_a.key_id(),
            signer_pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            class: SigClass::UID_POSITIVE,
            sig: sk_a.sign(digest),
            subpackets: Default::default(),
        });
        keyring.publish(kb_b.clone());
        updater.update(&kb_b).unwrap();

        let opts = TrustOptions {
            completes_needed: 1,
            ..Default::default()
        };
        let result = check_trust(&store, &keyring, &registry, &opts, &pk_b, 0).unwrap();
        assert_eq!(result.level, TrustLevel::Fully);
    }

    #[test]
    fn keyblock_order_first_certifier_wins_the_short_circuit() {
        // Two UIDs on the target key, each cross-signed by a different
        // ultimate root: "first" has ownertrust Fully, "second" has the
        // default ownertrust (Unknown). Spec §4.6's tie-break is UID-list
        // order x slot order, so the first UID's signer must be the one
        // the first-hop-from-ultimate short-circuit (§4.6 step 4) returns
        // on — if UID/KEY creation prepended instead of appended (as it
        // once did), "second" would end up first and the result would
        // wrongly come back Unknown instead of Fully.
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let mut registry = UltimateRegistry::new();

        let sk_first = RistrettoSk::generate();
        keyring.add_secret(sk_first);
        let sk_first = keyring.enum_secret_keys().remove(0);
        let pk_first = sk_first.public_key();
        let fpr_first = pk_first.fingerprint();
        let updater = Updater::new(&store, &keyring);
        let dir_first = updater.insert(&pk_first).unwrap().dir_lid;
        registry.register(dir_first);
        fresh_dir_with_ownertrust(&store, dir_first, TrustLevel::Fully as u8);
        let mut kb_first = Keyblock::new();
        kb_first.push_primary(KeyPacket {
            pk: pk_first,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_first,
            timestamp: 0,
            expiredate: 0,
        });
        keyring.publish(kb_first);

        let sk_second = RistrettoSk::generate();
        keyring.add_secret(sk_second);
        let sk_second = keyring.enum_secret_keys().remove(1);
        let pk_second = sk_second.public_key();
        let fpr_second = pk_second.fingerprint();
        let dir_second = updater.insert(&pk_second).unwrap().dir_lid;
        registry.register(dir_second);
        // Left at the default ownertrust (Unknown) deliberately.
        let mut kb_second = Keyblock::new();
        kb_second.push_primary(KeyPacket {
            pk: pk_second,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_second,
            timestamp: 0,
            expiredate: 0,
        });
        keyring.publish(kb_second);

        let sk_b = RistrettoSk::generate();
        let pk_b = sk_b.public_key();
        let fpr_b = pk_b.fingerprint();
        updater.insert(&pk_b).unwrap();

        let mut kb_b = Keyblock::new();
        kb_b.push_primary(KeyPacket {
            pk: pk_b,
            pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            fingerprint: fpr_b,
            timestamp: 0,
            expiredate: 0,
        });
        kb_b.push_uid("first@example.com");
        let digest_first = crate::crypto::ristretto::signing_digest(&fpr_b, b"first@example.com");
        kb_b.push_sig(SignaturePacket {
            signer_keyid: fpr_first.key_id(),
            signer_pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            class: SigClass::UID_POSITIVE,
            sig: sk_first.sign(digest_first),
            subpackets: Default::default(),
        });
        kb_b.push_uid("second@example.com");
        let digest_second = crate::crypto::ristretto::signing_digest(&fpr_b, b"second@example.com");
        kb_b.push_sig(SignaturePacket {
            signer_keyid: fpr_second.key_id(),
            signer_pubkey_algo: PUBKEY_ALGO_RISTRETTO,
            class: SigClass::UID_POSITIVE,
            sig: sk_second.sign(digest_second),
            subpackets: Default::default(),
        });
        keyring.publish(kb_b.clone());
        updater.update(&kb_b).unwrap();

        let result = check_trust(&store, &keyring, &registry, &TrustOptions::default(), &pk_b, 0).unwrap();
        assert_eq!(result.level, TrustLevel::Fully);
    }

    #[test]
    fn depth_bound_returns_undefined() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        let pk = sk.public_key();
        let updater = Updater::new(&store, &keyring);
        let dir_lid = updater.insert(&pk).unwrap().dir_lid;
        let registry = UltimateRegistry::new();
        let dir = read_dir(&store, dir_lid).unwrap();
        let level = verify_key(
            &store,
            &keyring,
            &registry,
            &TrustOptions {
                max_cert_depth: 0,
                ..Default::default()
            },
            0,
            &dir,
        )
        .unwrap();
        assert_eq!(level, TrustLevel::Undefined);
    }
}
