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

//! The crypto/keyring interface the core consumes (spec §6, component C2).
//! This is a black box to the update engine and trust evaluator: parsing
//! key material, computing fingerprints and key ids, and verifying a
//! signature packet against a key and hashed user id are all assumed to
//! live here, out of the core's scope (spec §1).
//!
//! [`ristretto`] adapts the teacher's own `Pk`/`Sk`/`Sig` traits
//! (`algo/mod.rs`, `algo/ristretto25519.rs`) into one concrete, testable
//! implementation of this trait, so the rest of the crate can be exercised
//! end to end without wiring in a real OpenPGP packet parser.

use crate::ids::{Fingerprint, KeyId, NameHash, PubkeyAlgo};
use crate::keyblock::{Keyblock, SignaturePacket, SubpktType};

/// Outcome of [`Keyring::check_key_signature`] (spec §6: "ok | NO_PUBKEY |
/// other-error").
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SigCheckResult {
    /// The signature verified. `self_sig` reports whether the signer was
    /// the keyblock's own primary key.
    Valid { self_sig: bool },
    /// The signature was checked against the signer's key and did not
    /// verify.
    Invalid,
    /// The signer's public key is not available to check against.
    NoPubkey,
}

/// What a [`SignaturePacket`] binds, so the keyring knows what bytes were
/// actually hashed and signed.
pub enum SignedSubject<'a> {
    /// A certification over `(primary key, user id)`.
    UserId(usize),
    /// A subkey-binding or subkey-revocation signature over `(primary key,
    /// subkey)`.
    Subkey(usize),
    /// A key-revocation signature over the primary key alone.
    PrimaryKey,
    #[doc(hidden)]
    _Marker(std::marker::PhantomData<&'a ()>),
}

/// The external crypto/keyring collaborator (spec §6, C2). Generic over the
/// concrete public key (`Pk`) and signature (`Sig`) representations.
pub trait Keyring {
    type Pk: Clone;
    type Sk: Clone;
    type Sig: Clone;

    fn fingerprint_from_pk(&self, pk: &Self::Pk) -> Fingerprint;

    /// The pubkey algorithm id this backend reports for `pk` (spec §3
    /// KEY.pubkey_algo). Not itemized among spec §6's C2 operations by name,
    /// but required to populate that field when [`crate::update::Updater`]
    /// allocates a KEY record — every concrete backend has exactly one fixed
    /// answer to give here.
    fn pubkey_algo(&self, pk: &Self::Pk) -> PubkeyAlgo;

    fn keyid_from_pk(&self, pk: &Self::Pk) -> KeyId { self.fingerprint_from_pk(pk).key_id() }

    fn keyid_from_fingerprint(&self, fpr: &Fingerprint) -> KeyId { fpr.key_id() }

    fn pubkey_from_sk(&self, sk: &Self::Sk) -> Self::Pk;

    /// `get_pubkey(keyid) -> pk | not-found`.
    fn get_pubkey(&self, keyid: KeyId) -> Option<Self::Pk>;

    /// `get_pubkey_byfprint`.
    fn get_pubkey_byfpr(&self, fpr: &Fingerprint) -> Option<Self::Pk>;

    /// `get_pubkey_byname`.
    fn get_pubkey_byname(&self, name: &str) -> Option<Self::Pk>;

    /// `get_keyblock_byfprint(fpr) -> keyblock`.
    fn get_keyblock_byfpr(&self, fpr: &Fingerprint) -> Option<Keyblock<Self::Pk, Self::Sig>>;

    /// `enum_secret_keys(context) -> sk | end`.
    fn enum_secret_keys(&self) -> Vec<Self::Sk>;

    /// `check_key_signature(keyblock, signode) -> ok | NO_PUBKEY |
    /// other-error` and reports whether the signature is a self-sig.
    fn check_key_signature(
        &self,
        keyblock: &Keyblock<Self::Pk, Self::Sig>,
        subject: SignedSubject,
        sig: &SignaturePacket<Self::Sig>,
    ) -> SigCheckResult;

    /// `rmd160_hash_buffer(data) -> 20 bytes`.
    fn rmd160_hash_buffer(&self, data: &[u8]) -> NameHash;

    /// `parse_sig_subpkt2(sig, type) -> bytes | none`.
    fn parse_sig_subpkt2(&self, sig: &SignaturePacket<Self::Sig>, typ: SubpktType) -> Option<Vec<u8>> {
        sig.subpackets.get(&typ).cloned()
    }
}

pub mod ristretto;
pub use ristretto::{RistrettoKeyring, RistrettoPk, RistrettoSig, RistrettoSk};
