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

//! A concrete, testable [`Keyring`] backend built on `ec25519`'s Ristretto
//! signatures — adapted almost verbatim from the teacher's
//! `algo::ristretto25519` module, generalized from a single fixed-identity
//! use case to the multi-key, multi-uid keyblocks this crate's update
//! engine consumes.
//!
//! This is not an OpenPGP implementation: there is no RSA/EdDSA packet
//! parser here, by design (spec §1 scopes real OpenPGP parsing out of the
//! core entirely). It exists so the rest of the crate — which only ever
//! talks to the [`Keyring`] trait — can be driven end to end in tests with
//! real signature verification instead of a stub that always says yes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Deref;

use commit_verify::{Digest as _, Sha256};
use ec25519::{Noise, PublicKey, SecretKey, Signature};
use rand::{random, thread_rng, Rng};

use crate::ids::{Fingerprint, KeyId, NameHash, PubkeyAlgo};
use crate::keyblock::{Keyblock, SignaturePacket};

use super::{Keyring, SigCheckResult, SignedSubject};

/// The algorithm id this backend reports through [`Key::pubkey_algo`] /
/// `KeyPacket::pubkey_algo` (spec §3 KEY.pubkey_algo is opaque to the core;
/// this value is only meaningful to this backend).
pub const PUBKEY_ALGO_RISTRETTO: PubkeyAlgo = PubkeyAlgo(1);

#[derive(Copy, Clone)]
pub struct RistrettoSk(SecretKey);

impl RistrettoSk {
    pub fn generate() -> Self {
        let mut data = [0u8; 64];
        thread_rng().fill(&mut data);
        RistrettoSk(SecretKey::new(data))
    }

    pub fn sign(&self, digest: [u8; 32]) -> RistrettoSig {
        RistrettoSig(self.0.sign(digest, Some(Noise::new(random()))))
    }

    pub fn public_key(&self) -> RistrettoPk { RistrettoPk(self.0.public_key()) }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RistrettoPk(PublicKey);

impl RistrettoPk {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.0.deref());
        let digest: [u8; 32] = hasher.finalize().into();
        Fingerprint::new(&digest[..20])
    }

    pub fn verify(&self, digest: [u8; 32], sig: &RistrettoSig) -> bool {
        self.0.verify(digest, &sig.0).is_ok()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RistrettoSig(Signature);

fn digest_bytes(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// An in-memory stand-in for a local secret keyring plus a simple
/// fingerprint-addressed public-keyblock store — exactly the two
/// responsibilities spec §6 assigns to C2 (`enum_secret_keys`,
/// `get_keyblock_byfprint`), wired up for tests rather than a real
/// filesystem keyring.
#[derive(Default)]
pub struct RistrettoKeyring {
    secrets: RefCell<Vec<RistrettoSk>>,
    published: RefCell<HashMap<Fingerprint, Keyblock<RistrettoPk, RistrettoSig>>>,
}

impl RistrettoKeyring {
    pub fn new() -> Self { Self::default() }

    /// Registers a secret key as "held locally" (spec §4.3's ultimate-root
    /// enumeration source).
    pub fn add_secret(&self, sk: RistrettoSk) { self.secrets.borrow_mut().push(sk); }

    /// Publishes a keyblock so `get_keyblock_byfpr`/`get_pubkey_byfpr` can
    /// resolve it — standing in for a real keyserver or local pubring.
    pub fn publish(&self, keyblock: Keyblock<RistrettoPk, RistrettoSig>) {
        let fpr = keyblock.primary().fingerprint;
        self.published.borrow_mut().insert(fpr, keyblock);
    }

    fn uid_name<'a>(&self, keyblock: &'a Keyblock<RistrettoPk, RistrettoSig>, idx: usize) -> &'a str {
        use crate::keyblock::Packet;
        keyblock
            .packets
            .iter()
            .filter_map(|p| match p {
                Packet::UserId(u) => Some(u.name.as_str()),
                _ => None,
            })
            .nth(idx)
            .expect("uid index in range")
    }

    fn subkey_pk(&self, keyblock: &Keyblock<RistrettoPk, RistrettoSig>, idx: usize) -> RistrettoPk {
        use crate::keyblock::Packet;
        keyblock
            .packets
            .iter()
            .filter_map(|p| match p {
                Packet::Subkey(k) => Some(k.pk),
                _ => None,
            })
            .nth(idx)
            .expect("subkey index in range")
    }
}

impl Keyring for RistrettoKeyring {
    type Pk = RistrettoPk;
    type Sk = RistrettoSk;
    type Sig = RistrettoSig;

    fn fingerprint_from_pk(&self, pk: &Self::Pk) -> Fingerprint { pk.fingerprint() }

    fn pubkey_algo(&self, _pk: &Self::Pk) -> PubkeyAlgo { PUBKEY_ALGO_RISTRETTO }

    fn pubkey_from_sk(&self, sk: &Self::Sk) -> Self::Pk { sk.public_key() }

    fn get_pubkey(&self, keyid: KeyId) -> Option<Self::Pk> {
        self.published
            .borrow()
            .values()
            .map(|kb| kb.primary())
            .find(|k| k.fingerprint.key_id() == keyid)
            .map(|k| k.pk)
    }

    fn get_pubkey_byfpr(&self, fpr: &Fingerprint) -> Option<Self::Pk> {
        self.published.borrow().get(fpr).map(|kb| kb.primary().pk)
    }

    fn get_pubkey_byname(&self, name: &str) -> Option<Self::Pk> {
        use crate::keyblock::Packet;
        self.published
            .borrow()
            .values()
            .find(|kb| {
                kb.packets
                    .iter()
                    .any(|p| matches!(p, Packet::UserId(u) if u.name == name))
            })
            .map(|kb| kb.primary().pk)
    }

    fn get_keyblock_byfpr(&self, fpr: &Fingerprint) -> Option<Keyblock<Self::Pk, Self::Sig>> {
        self.published.borrow().get(fpr).cloned()
    }

    fn enum_secret_keys(&self) -> Vec<Self::Sk> { self.secrets.borrow().clone() }

    fn check_key_signature(
        &self,
        keyblock: &Keyblock<Self::Pk, Self::Sig>,
        subject: SignedSubject,
        sig: &SignaturePacket<Self::Sig>,
    ) -> SigCheckResult {
        let Some(signer_pk) = self.get_pubkey(sig.signer_keyid) else {
            return SigCheckResult::NoPubkey;
        };
        let primary = keyblock.primary();
        let digest = match subject {
            SignedSubject::UserId(idx) => {
                digest_bytes(&[primary.fingerprint.as_bytes(), self.uid_name(keyblock, idx).as_bytes()])
            }
            SignedSubject::Subkey(idx) => {
                let subkey = self.subkey_pk(keyblock, idx);
                digest_bytes(&[primary.fingerprint.as_bytes(), subkey.fingerprint().as_bytes()])
            }
            SignedSubject::PrimaryKey => digest_bytes(&[primary.fingerprint.as_bytes()]),
            SignedSubject::_Marker(_) => unreachable!(),
        };
        let self_sig = sig.signer_keyid == primary.fingerprint.key_id();
        if signer_pk.verify(digest, &sig.sig) {
            SigCheckResult::Valid { self_sig }
        } else {
            SigCheckResult::Invalid
        }
    }

    fn rmd160_hash_buffer(&self, data: &[u8]) -> NameHash {
        // Stand-in for RFC 4880's RIPEMD-160 namehash: the real primitive is
        // a C2 concern (spec §6) and out of scope here. Sha256 truncated to
        // 20 bytes gives the same "stable, collision-resistant 20-byte
        // digest" property the core actually relies on.
        let full = digest_bytes(&[data]);
        let mut buf = [0u8; 20];
        buf.copy_from_slice(&full[..20]);
        NameHash::from_bytes(buf)
    }
}

/// Computes the digest a [`RistrettoSk`] must sign to certify `subject`,
/// mirroring [`RistrettoKeyring::check_key_signature`]'s own hashing so
/// test fixtures can produce signatures that verify.
pub fn signing_digest(primary_fpr: &Fingerprint, subject_bytes: &[u8]) -> [u8; 32] {
    digest_bytes(&[primary_fpr.as_bytes(), subject_bytes])
}

pub fn primary_key_digest(primary_fpr: &Fingerprint) -> [u8; 32] { digest_bytes(&[primary_fpr.as_bytes()]) }
