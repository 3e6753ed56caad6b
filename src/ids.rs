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

//! Stable identifiers used across the record graph: record numbers (LIDs),
//! OpenPGP key ids, fingerprints and user-id name hashes.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use strict_encoding::{StrictDecode, StrictDumb, StrictEncode, StrictType};

use crate::LIB_NAME_WOTDB;

/// Local identifier: the record number of a [`crate::record::Dir`] or
/// [`crate::record::Sdir`] entry. Stable for the lifetime of the key in the
/// store (spec §3, invariant 1; GLOSSARY "LID").
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Lid(u32);

impl Lid {
    /// The reserved value meaning "no record" (a deleted signature slot, an
    /// absent link).
    pub const NONE: Lid = Lid(0);

    pub const fn new(recnum: u32) -> Self { Lid(recnum) }

    pub const fn is_none(self) -> bool { self.0 == 0 }

    pub const fn to_u32(self) -> u32 { self.0 }
}

impl From<u32> for Lid {
    fn from(recnum: u32) -> Self { Lid(recnum) }
}

impl Display for Lid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// A 64-bit OpenPGP key id, as derived from a fingerprint's low 8 bytes.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct KeyId([u8; 8]);

impl KeyId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self { KeyId(bytes) }

    pub fn as_bytes(&self) -> &[u8; 8] { &self.0 }
}

impl Debug for KeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// A public key fingerprint. OpenPGP v3 keys carry a 16-byte (MD5)
/// fingerprint; v4 and later carry 20 bytes (SHA-1) — the payload is always
/// stored in the low-order bytes of a 20-byte buffer with `len` recording
/// how many are significant (spec §3, KEY.fingerprint_len/fingerprint).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Fingerprint {
    len: u8,
    bytes: [u8; 20],
}

#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display(doc_comments)]
pub enum FingerprintParseError {
    /// fingerprint must be 32 or 40 hex digits, got {0}.
    WrongLength(usize),
    /// fingerprint contains non-hex characters.
    InvalidHex,
}

impl std::error::Error for FingerprintParseError {}

impl Fingerprint {
    pub fn new(bytes: &[u8]) -> Self {
        assert!(bytes.len() == 16 || bytes.len() == 20, "fingerprint must be 16 or 20 bytes");
        let mut buf = [0u8; 20];
        buf[..bytes.len()].copy_from_slice(bytes);
        Fingerprint {
            len: bytes.len() as u8,
            bytes: buf,
        }
    }

    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..self.len as usize] }

    pub fn len(&self) -> usize { self.len as usize }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// The low 8 bytes of a v4+ fingerprint are its key id (RFC 4880 §12.2).
    /// For a 16-byte (v3) fingerprint the key id is carried separately by
    /// the keyblock and this falls back to the last 8 bytes as a best
    /// effort — v3 keys are not otherwise distinguished by this store.
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        let tail = &self.bytes[self.len as usize - 8..self.len as usize];
        id.copy_from_slice(tail);
        KeyId(id)
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "Fingerprint({})", self) }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 && s.len() != 40 {
            return Err(FingerprintParseError::WrongLength(s.len()));
        }
        let mut bytes = Vec::with_capacity(s.len() / 2);
        let mut chars = s.chars();
        while let (Some(hi), Some(lo)) = (chars.next(), chars.next()) {
            let hi = hi.to_digit(16).ok_or(FingerprintParseError::InvalidHex)?;
            let lo = lo.to_digit(16).ok_or(FingerprintParseError::InvalidHex)?;
            bytes.push((hi as u8) << 4 | lo as u8);
        }
        Ok(Fingerprint::new(&bytes))
    }
}

/// RIPEMD-160 hash of a user-id string (spec §3, UID.namehash).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct NameHash([u8; 20]);

impl NameHash {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self { NameHash(bytes) }

    pub fn as_bytes(&self) -> &[u8; 20] { &self.0 }
}

impl Debug for NameHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, "NameHash({})", self) }
}

impl Display for NameHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// OpenPGP public-key algorithm id (RFC 4880 §9.1); stored verbatim, never
/// interpreted by the core.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct PubkeyAlgo(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_round_trip() {
        let hex = "0102030405060708090A0B0C0D0E0F1011121314";
        let fp: Fingerprint = hex.parse().unwrap();
        assert_eq!(fp.len(), 20);
        assert_eq!(fp.to_string(), hex);
    }

    #[test]
    fn fingerprint_v3_length() {
        let hex = "0102030405060708090A0B0C0D0E0F10";
        let fp: Fingerprint = hex.parse().unwrap();
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn fingerprint_rejects_bad_length() {
        assert!(matches!(
            "abcd".parse::<Fingerprint>(),
            Err(FingerprintParseError::WrongLength(4))
        ));
    }

    #[test]
    fn key_id_is_low_eight_bytes() {
        let hex = "0102030405060708090A0B0C0D0E0F1011121314";
        let fp: Fingerprint = hex.parse().unwrap();
        assert_eq!(fp.key_id().to_string(), "0D0E0F1011121314");
    }

    #[test]
    fn lid_none_is_zero() {
        assert!(Lid::NONE.is_none());
        assert!(!Lid::new(1).is_none());
    }
}
