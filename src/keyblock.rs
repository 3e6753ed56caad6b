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

//! The in-memory keyblock the update engine consumes (spec §4.4,
//! GLOSSARY "Keyblock"): an ordered sequence of packets — one primary
//! public key, zero or more subkeys, user ids, and the signatures that
//! certify them, in canonical order so that a signature following a user id
//! belongs to that user id, and a signature immediately following the
//! primary key or a subkey belongs to that key.

use std::collections::BTreeMap;

use crate::ids::{Fingerprint, KeyId, PubkeyAlgo};

/// Signature class byte (RFC 4880 §5.2.1), kept opaque to the core beyond
/// the handful of classes spec §4.4 dispatches on.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SigClass(pub u8);

impl SigClass {
    pub const UID_GENERIC: SigClass = SigClass(0x10);
    pub const UID_PERSONA: SigClass = SigClass(0x11);
    pub const UID_CASUAL: SigClass = SigClass(0x12);
    pub const UID_POSITIVE: SigClass = SigClass(0x13);
    pub const SUBKEY_BINDING: SigClass = SigClass(0x18);
    pub const KEY_REVOCATION: SigClass = SigClass(0x20);
    pub const SUBKEY_REVOCATION: SigClass = SigClass(0x28);
    pub const CERT_REVOCATION: SigClass = SigClass(0x30);

    /// `0x10..=0x13`: a certification of a user id (spec §4.4 step 2).
    pub fn is_uid_cert(self) -> bool { (0x10..=0x13).contains(&self.0) }

    pub fn is_subkey_binding(self) -> bool { self == Self::SUBKEY_BINDING }

    pub fn is_key_revocation(self) -> bool { self == Self::KEY_REVOCATION }

    pub fn is_subkey_revocation(self) -> bool { self == Self::SUBKEY_REVOCATION }

    pub fn is_cert_revocation(self) -> bool { self == Self::CERT_REVOCATION }

    /// Classes accepted when there is no current user-id cursor (spec §4.4
    /// step 2: "accept only classes 0x18, 0x20, 0x28").
    pub fn valid_without_uid(self) -> bool {
        self.is_subkey_binding() || self.is_key_revocation() || self.is_subkey_revocation()
    }
}

/// A subpacket family the core pulls out of a self-signature to rebuild a
/// user id's preference chain (spec §4.4 step 2, self-sig branch).
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum SubpktType {
    Sym,
    Hash,
    Compr,
}

/// A primary key or subkey packet.
#[derive(Clone, Debug)]
pub struct KeyPacket<K> {
    pub pk: K,
    pub pubkey_algo: PubkeyAlgo,
    pub fingerprint: Fingerprint,
    pub timestamp: u64,
    /// Non-zero means the key is no longer valid after this time (spec §4.6
    /// pre-flight "expiredate").
    pub expiredate: u64,
}

/// A user-id packet: just the identity string: §4.4 hashes it with
/// RIPEMD-160 to get the namehash.
#[derive(Clone, Debug)]
pub struct UserIdPacket {
    pub name: String,
}

/// A signature packet, opaque beyond the fields the core dispatches on.
#[derive(Clone, Debug)]
pub struct SignaturePacket<S> {
    pub signer_keyid: KeyId,
    pub signer_pubkey_algo: PubkeyAlgo,
    pub class: SigClass,
    pub sig: S,
    pub subpackets: BTreeMap<SubpktType, Vec<u8>>,
}

/// One packet in canonical keyblock order.
#[derive(Clone, Debug)]
pub enum Packet<K, S> {
    PrimaryKey(KeyPacket<K>),
    Subkey(KeyPacket<K>),
    UserId(UserIdPacket),
    Signature(SignaturePacket<S>),
}

/// An ordered packet sequence representing one full public key (GLOSSARY
/// "Keyblock").
#[derive(Clone, Debug, Default)]
pub struct Keyblock<K, S> {
    pub packets: Vec<Packet<K, S>>,
}

impl<K: Clone, S> Keyblock<K, S> {
    pub fn new() -> Self { Keyblock { packets: Vec::new() } }

    pub fn primary(&self) -> &KeyPacket<K> {
        self.packets
            .iter()
            .find_map(|p| match p {
                Packet::PrimaryKey(k) => Some(k),
                _ => None,
            })
            .expect("keyblock always starts with a primary key")
    }

    pub fn push_primary(&mut self, key: KeyPacket<K>) -> &mut Self {
        self.packets.push(Packet::PrimaryKey(key));
        self
    }

    pub fn push_subkey(&mut self, key: KeyPacket<K>) -> &mut Self {
        self.packets.push(Packet::Subkey(key));
        self
    }

    pub fn push_uid(&mut self, name: impl Into<String>) -> &mut Self {
        self.packets.push(Packet::UserId(UserIdPacket { name: name.into() }));
        self
    }

    pub fn push_sig(&mut self, sig: SignaturePacket<S>) -> &mut Self {
        self.packets.push(Packet::Signature(sig));
        self
    }
}
