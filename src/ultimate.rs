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

//! The ultimate-root registry (spec §4.3, component C5): the set of DIR
//! LIDs whose owning secret key is held locally. Populated once at startup
//! by enumerating every locally held secret key; read-only afterward and
//! consulted by [`crate::trust`] as the walk's terminal condition.

use log::{debug, warn};

use crate::crypto::Keyring;
use crate::error::CoreError;
use crate::hints;
use crate::ids::Lid;
use crate::localid::LocalIdSet;
use crate::store::RecordStore;
use crate::update::Updater;

/// Index of directory LIDs backed by a locally held secret key.
#[derive(Clone, Debug, Default)]
pub struct UltimateRegistry {
    lids: LocalIdSet,
}

impl UltimateRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn contains(&self, lid: Lid) -> bool { self.lids.contains(lid) }

    pub fn iter(&self) -> impl Iterator<Item = Lid> + '_ { self.lids.iter().map(|(lid, _)| lid) }

    pub fn len(&self) -> usize { self.lids.len() }

    /// Directly registers a LID as an ultimate root, without touching the
    /// keyring. Used once a DIR's ownership is already established.
    pub fn register(&mut self, lid: Lid) {
        if self.lids.insert(lid, 0) {
            debug!("duplicate ultimate-root registration for {lid}, ignoring");
        }
    }

    /// Spec §4.3: for every locally held secret key, resolve its public key,
    /// ensure a DIR exists for it (inserting one via [`Updater`] if absent),
    /// and register the DIR's LID. Lookup/insert failures for one key are
    /// logged and skipped; they do not abort the enumeration. A promotion
    /// that surfaces a pending hint list is resolved immediately, in the
    /// same pass, per spec §9.
    pub fn bootstrap<S, K>(&mut self, store: &S, keyring: &K, updater: &Updater<'_, S, K>) -> Result<(), CoreError>
    where
        S: RecordStore,
        K: Keyring,
    {
        for sk in keyring.enum_secret_keys() {
            let pk = keyring.pubkey_from_sk(&sk);
            let fpr = keyring.fingerprint_from_pk(&pk);
            let dir_lid = match store.search_dir_byfpr(&fpr) {
                Some(lid) => lid,
                None => match updater.insert(&pk) {
                    Ok(outcome) => {
                        if let Some(hintlist) = outcome.promoted_hintlist {
                            hints::resolve(store, keyring, outcome.dir_lid, hintlist)?;
                        }
                        outcome.dir_lid
                    }
                    Err(err) => {
                        warn!("skipping ultimate-root candidate {fpr}: {err}");
                        continue;
                    }
                },
            };
            self.register(dir_lid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut reg = UltimateRegistry::new();
        reg.register(Lid::new(1));
        reg.register(Lid::new(1));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(Lid::new(1)));
    }
}
