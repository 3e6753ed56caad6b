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

//! The on-disk record model (spec §3): a tagged union over
//! `{Dir, Sdir, Key, Uid, Sig, Pref, Hlst}`. Implemented as a Rust sum type
//! with payload variants per spec §9's design note, rather than a shared
//! struct carrying a type-discriminant byte; [`crate::store`] is
//! responsible for mapping this to and from the fixed-size on-disk form.

use amplify::confinement::{Confined, SmallVec, U8};
use strict_encoding::{StrictDecode, StrictDumb, StrictEncode, StrictType};

use crate::ids::{Fingerprint, KeyId, Lid, NameHash, PubkeyAlgo};
use crate::LIB_NAME_WOTDB;

/// Number of signature slots packed into one [`Sig`] record.
pub const SIGS_PER_RECORD: usize = 6;
/// Number of `(preftype, algo)` pairs packed into one [`Pref`] record.
pub const ITEMS_PER_PREF_RECORD: usize = 15;
/// Number of LID slots packed into one [`Hlst`] record.
pub const ITEMS_PER_HLST_RECORD: usize = 10;

/// Mask selecting the trust level out of an ownertrust/computed-trust byte;
/// higher bits carry flags such as [`TRUST_FLAG_REVOKED`].
pub const TRUST_MASK: u8 = 0x0f;
pub const TRUST_FLAG_REVOKED: u8 = 0x20;

/// Trust levels, in ascending order (spec §6, "Trust values").
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[repr(u8)]
pub enum TrustLevel {
    #[default]
    Unknown = 0,
    Expired = 1,
    Undefined = 2,
    Never = 3,
    Marginal = 4,
    Fully = 5,
    Ultimate = 6,
}

impl TrustLevel {
    pub fn from_masked(byte: u8) -> Self {
        match byte & TRUST_MASK {
            1 => TrustLevel::Expired,
            2 => TrustLevel::Undefined,
            3 => TrustLevel::Never,
            4 => TrustLevel::Marginal,
            5 => TrustLevel::Fully,
            6 => TrustLevel::Ultimate,
            _ => TrustLevel::Unknown,
        }
    }

    pub fn display_code(self, revoked: bool) -> char {
        if revoked {
            return 'r';
        }
        match self {
            TrustLevel::Unknown => 'o',
            TrustLevel::Expired => 'e',
            TrustLevel::Undefined => 'q',
            TrustLevel::Never => 'n',
            TrustLevel::Marginal => 'm',
            TrustLevel::Fully => 'f',
            TrustLevel::Ultimate => 'u',
        }
    }
}

/// A small bitset over a `u8`, used for the DIR/UID/SIG flag bytes (spec §3).
/// Hand-rolled rather than pulled from a flags crate: the teacher's own
/// dependency set has no equivalent and the set of bits here is fixed and
/// tiny enough not to warrant one.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct Flags8(u8);

impl Flags8 {
    pub const fn from_bits_truncate(bits: u8) -> Self { Flags8(bits) }

    pub const fn bits(self) -> u8 { self.0 }

    pub const fn contains(self, bit: u8) -> bool { self.0 & bit == bit }

    pub fn insert(&mut self, bit: u8) { self.0 |= bit; }

    pub fn remove(&mut self, bit: u8) { self.0 &= !bit; }
}

/// DIR-level flag bits (spec §3 DIR.dirflags).
pub mod dirflag {
    /// The trust-evaluator result for this DIR's subtree is cached and
    /// still valid (spec §3 invariant 8: cleared on any graph mutation).
    pub const CHECKED: u8 = 0x01;
    /// The key has been revoked.
    pub const REVOKED: u8 = 0x02;
}

/// UID-level flag bits (spec §3 UID.uidflags).
pub mod uidflag {
    pub const CHECKED: u8 = 0x01;
    pub const VALID: u8 = 0x02;
}

/// Per-slot signature flag bits (spec §3 SIG slot flag bits).
pub mod sigflag {
    pub const CHECKED: u8 = 0x01;
    pub const VALID: u8 = 0x02;
    pub const EXPIRED: u8 = 0x04;
    pub const REVOKED: u8 = 0x08;
    pub const NOPUBKEY: u8 = 0x10;
}

pub type DirFlags = Flags8;
pub type UidFlags = Flags8;
pub type SigFlags = Flags8;

/// Directory record: a known public key (spec §3 DIR).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Dir {
    pub lid: Lid,
    pub ownertrust: u8,
    pub dirflags: u8,
    pub keylist: Lid,
    pub uidlist: Lid,
}

impl Dir {
    pub fn flags(&self) -> DirFlags { DirFlags::from_bits_truncate(self.dirflags) }

    pub fn set_flags(&mut self, flags: DirFlags) { self.dirflags = flags.bits(); }

    pub fn is_checked(&self) -> bool { self.flags().contains(dirflag::CHECKED) }

    pub fn is_revoked(&self) -> bool { self.flags().contains(dirflag::REVOKED) }

    pub fn clear_checked(&mut self) {
        let mut flags = self.flags();
        flags.remove(dirflag::CHECKED);
        self.set_flags(flags);
    }
}

/// Shadow directory: a placeholder for a key referenced by a signature but
/// not yet present locally (spec §3 SDIR; GLOSSARY "Shadow directory").
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Sdir {
    pub lid: Lid,
    pub keyid: KeyId,
    pub pubkey_algo: PubkeyAlgo,
    pub hintlist: Lid,
}

/// A public key or subkey (spec §3 KEY).
///
/// `recnum` is this record's own storage address (what `DIR.keylist` and a
/// sibling `KEY.next` point to); `lid` is the *back-pointer* to the owning
/// DIR (spec §3 invariant 1; §9 design note: "treat this as a consistency
/// check and corruption sentinel, not a navigation primitive"). The two are
/// deliberately distinct fields — unlike `Dir`/`Sdir`, where the record's
/// own address and its `lid` are the same number by definition.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Key {
    pub recnum: Lid,
    pub lid: Lid,
    pub pubkey_algo: PubkeyAlgo,
    pub fingerprint: Fingerprint,
    pub next: Lid,
}

/// A user identity under a directory (spec §3 UID). See [`Key`] for the
/// `recnum` vs. `lid` distinction.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Uid {
    pub recnum: Lid,
    pub lid: Lid,
    pub namehash: NameHash,
    pub uidflags: u8,
    pub siglist: Lid,
    pub prefrec: Lid,
    pub next: Lid,
}

impl Uid {
    pub fn flags(&self) -> UidFlags { UidFlags::from_bits_truncate(self.uidflags) }

    pub fn set_flags(&mut self, flags: UidFlags) { self.uidflags = flags.bits(); }

    pub fn is_checked(&self) -> bool { self.flags().contains(uidflag::CHECKED) }
}

/// One signature slot: `(lid, flag)` where `lid == Lid::NONE` means deleted
/// (spec §3 invariant 4).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct SigSlot {
    pub lid: Lid,
    pub flag: u8,
}

impl SigSlot {
    pub fn is_deleted(&self) -> bool { self.lid.is_none() }

    pub fn flags(&self) -> SigFlags { SigFlags::from_bits_truncate(self.flag) }

    pub fn set_flags(&mut self, flags: SigFlags) { self.flag = flags.bits(); }
}

/// A record holding up to [`SIGS_PER_RECORD`] signature slots, chained via
/// `next` and owned by a [`Uid`] (spec §3 SIG). A freshly allocated record
/// is always filled to capacity by the allocator in [`crate::update`]; the
/// bound here only guards against an unbounded in-memory record. See [`Key`]
/// for the `recnum` vs. `lid` distinction.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Sig {
    pub recnum: Lid,
    pub lid: Lid,
    pub slots: SmallVec<SigSlot>,
    pub next: Lid,
}

/// A single preference item: `(preftype, algo_id)`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct PrefItem {
    pub preftype: PrefType,
    pub algo: u8,
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB, tags = custom, dumb = Self::None)]
pub enum PrefType {
    #[strict_type(tag = 0x00)]
    #[default]
    None,
    #[strict_type(tag = 0x01)]
    Sym,
    #[strict_type(tag = 0x02)]
    Hash,
    #[strict_type(tag = 0x03)]
    Compr,
}

/// A chained record packing up to [`ITEMS_PER_PREF_RECORD`] preference
/// items, owned by a [`Uid`] (spec §3 PREF). See [`Key`] for the `recnum`
/// vs. `lid` distinction.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Pref {
    pub recnum: Lid,
    pub lid: Lid,
    pub items: SmallVec<PrefItem>,
    pub next: Lid,
}

/// A chained array of LIDs anchored on an [`Sdir`]: the set of directories
/// that have at least one signature slot pointing at that shadow directory
/// (spec §3 HLST; GLOSSARY "Hint list"). `lid` back-points to the owning
/// SDIR; see [`Key`] for the `recnum` vs. `lid` distinction.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB)]
pub struct Hlst {
    pub recnum: Lid,
    pub lid: Lid,
    pub rnum: SmallVec<Lid>,
    pub next: Lid,
}

/// The tagged union of every record type the core stores (spec §9 design
/// note: "use a sum type with payload variants").
#[derive(Clone, Eq, PartialEq, Debug)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_WOTDB, tags = custom, dumb = Self::Dir(strict_dumb!()))]
pub enum Record {
    #[strict_type(tag = 0x01)]
    Dir(Dir),
    #[strict_type(tag = 0x02)]
    Sdir(Sdir),
    #[strict_type(tag = 0x03)]
    Key(Key),
    #[strict_type(tag = 0x04)]
    Uid(Uid),
    #[strict_type(tag = 0x05)]
    Sig(Sig),
    #[strict_type(tag = 0x06)]
    Pref(Pref),
    #[strict_type(tag = 0x07)]
    Hlst(Hlst),
}

/// Discriminant used by [`crate::store::RecordStore::read`]'s
/// `expected_type` parameter (spec §6: "if `expected_type != 0` and the
/// record's type differs, returns a mismatch error").
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum RecordType {
    Dir,
    Sdir,
    Key,
    Uid,
    Sig,
    Pref,
    Hlst,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Dir(_) => RecordType::Dir,
            Record::Sdir(_) => RecordType::Sdir,
            Record::Key(_) => RecordType::Key,
            Record::Uid(_) => RecordType::Uid,
            Record::Sig(_) => RecordType::Sig,
            Record::Pref(_) => RecordType::Pref,
            Record::Hlst(_) => RecordType::Hlst,
        }
    }

    /// This record's own storage address: for [`Dir`]/[`Sdir`] that's `lid`
    /// itself (the two coincide by definition); for every other variant it's
    /// the dedicated `recnum` field, since `lid` there is a back-pointer to
    /// the owning directory instead (see [`Key`]'s doc comment). This is
    /// what [`crate::store::RecordStore::write`] keys its storage on.
    pub fn recnum(&self) -> Lid {
        match self {
            Record::Dir(r) => r.lid,
            Record::Sdir(r) => r.lid,
            Record::Key(r) => r.recnum,
            Record::Uid(r) => r.recnum,
            Record::Sig(r) => r.recnum,
            Record::Pref(r) => r.recnum,
            Record::Hlst(r) => r.recnum,
        }
    }

    /// The back-pointer/owner field (spec §3 invariant 1): for [`Dir`]/
    /// [`Sdir`] this is the record's own address; for every other variant
    /// it points at the owning directory (or, for [`Hlst`], the owning
    /// shadow directory).
    pub fn lid(&self) -> Lid {
        match self {
            Record::Dir(r) => r.lid,
            Record::Sdir(r) => r.lid,
            Record::Key(r) => r.lid,
            Record::Uid(r) => r.lid,
            Record::Sig(r) => r.lid,
            Record::Pref(r) => r.lid,
            Record::Hlst(r) => r.lid,
        }
    }

    pub fn as_dir(&self) -> Option<&Dir> {
        match self {
            Record::Dir(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut Dir> {
        match self {
            Record::Dir(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sdir(&self) -> Option<&Sdir> {
        match self {
            Record::Sdir(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sdir_mut(&mut self) -> Option<&mut Sdir> {
        match self {
            Record::Sdir(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_uid(&self) -> Option<&Uid> {
        match self {
            Record::Uid(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_uid_mut(&mut self) -> Option<&mut Uid> {
        match self {
            Record::Uid(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Record::Key(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sig(&self) -> Option<&Sig> {
        match self {
            Record::Sig(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sig_mut(&mut self) -> Option<&mut Sig> {
        match self {
            Record::Sig(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pref(&self) -> Option<&Pref> {
        match self {
            Record::Pref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pref_mut(&mut self) -> Option<&mut Pref> {
        match self {
            Record::Pref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_hlst(&self) -> Option<&Hlst> {
        match self {
            Record::Hlst(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_hlst_mut(&mut self) -> Option<&mut Hlst> {
        match self {
            Record::Hlst(r) => Some(r),
            _ => None,
        }
    }
}

/// A confined (bounded) byte blob, reused wherever the codec needs a
/// length-checked buffer — mirrors the teacher's use of `amplify`'s
/// confinement types for bounded collections.
pub type SmallBlob = Confined<Vec<u8>, 0, { u8::MAX as usize }>;
pub type TinyBlobU8 = Confined<Vec<u8>, 0, U8>;
