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

//! A web-of-trust record store and trust evaluator: given a stream of
//! OpenPGP-style keyblocks, maintains a directory graph of keys, user ids
//! and cross-signatures, and answers queries about the computed trust level
//! of any key reachable from a small set of locally held ultimate-trust
//! roots.
//!
//! The crate is organized around the core/collaborator split its design
//! draws on: [`store`] and [`crypto`] are the interfaces to the two
//! external collaborators (a block-addressed record store and a key/
//! signature oracle), everything else is the core graph logic that only
//! ever talks to those two traits.

#[macro_use]
extern crate amplify;

pub const LIB_NAME_WOTDB: &str = "WoTDB";

pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod hints;
pub mod ids;
pub mod keyblock;
pub mod localid;
pub mod ownertrust;
pub mod record;
pub mod sigiter;
pub mod store;
pub mod trust;
pub mod ultimate;
pub mod update;

pub use context::Context;
pub use crypto::{Keyring, SigCheckResult, SignedSubject};
pub use error::{CoreError, CorruptionError, RecoverableError};
pub use ids::{Fingerprint, KeyId, Lid, NameHash, PubkeyAlgo};
pub use keyblock::{Keyblock, Packet, SigClass};
pub use ownertrust::{OwnerTrustError, OwnerTrustImport};
pub use record::{Dir, Hlst, Key, Pref, Record, RecordType, Sdir, Sig, TrustLevel, Uid};
pub use sigiter::{SigEdge, SigIter};
pub use store::{InMemoryStore, RecordStore, StoreError};
pub use trust::{TrustOptions, TrustPath, TrustResult};
pub use update::UpdateStats;
