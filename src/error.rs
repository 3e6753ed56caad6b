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

//! Error types. Follows spec §7's split between recoverable conditions
//! (captured as return values/slot flags, never abort) and corruption
//! (process-fatal: the in-memory graph state can no longer be trusted).

use crate::ids::Lid;

/// Recoverable lookup/verification failures (spec §7, first family).
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum RecoverableError {
    /// no record exists for the requested key.
    NotFound,

    /// the signer's public key is not available locally.
    NoPubkey,

    /// the signature failed cryptographic verification.
    BadSignature,

    /// record {0} exists but is not of the expected type.
    WrongRecordType(Lid),
}

/// A store or graph-walk condition that leaves the in-memory view of the
/// database unreliable. Per spec §7 / §9 these are expected to abort the
/// process ("run the fix-trust-db tool"); the core only needs to be able to
/// *detect and report* them, not to recover from them.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum CorruptionError {
    /// failed to read record {0} from the store.
    ReadFailed(Lid),

    /// failed to write record {0} to the store.
    WriteFailed(Lid),

    /// failed to flush the store to stable storage.
    SyncFailed,

    /// signature record chained under directory {owner} has a back-pointer
    /// to {found} instead.
    SignatureOwnerMismatch { owner: Lid, found: Lid },

    /// signature slot targets record {0}, which is neither a directory nor
    /// a shadow directory.
    DanglingSignatureTarget(Lid),

    /// directory {0} has no keylist; a key must exist before trust can be
    /// computed over it.
    DirectoryWithoutKeys(Lid),
}

/// Top-level error returned by the update engine and trust evaluator.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum CoreError {
    #[display(inner)]
    #[from]
    Recoverable(RecoverableError),

    #[display(inner)]
    #[from]
    Corrupt(CorruptionError),

    /// the key's creation timestamp is in the future.
    TimeConflict,
}

impl CoreError {
    pub fn is_corrupt(&self) -> bool { matches!(self, CoreError::Corrupt(_)) }
}
