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

//! Process-wide state (spec §9, "Process-wide state" design note): the
//! record store handle and the ultimate-root registry "together form a
//! singleton" the note says to "wrap... in a context object passed
//! explicitly", rather than reach for global mutable state. [`Context`] is
//! that object; it owns the registry and trust options and borrows the
//! store and keyring for its lifetime.

use crate::crypto::Keyring;
use crate::error::CoreError;
use crate::store::RecordStore;
use crate::trust::{self, TrustOptions, TrustPath, TrustResult};
use crate::ultimate::UltimateRegistry;
use crate::update::{UpdateStats, Updater};

/// Bundles a store handle, a keyring handle, the ultimate-root registry and
/// the trust-computation thresholds that every top-level operation needs.
/// Spec §4.3/§4.6/§5: the registry is built once (here, in [`Context::bootstrap`])
/// and read-only thereafter; the store is exclusively owned for the
/// context's lifetime.
pub struct Context<'s, S: RecordStore, K: Keyring> {
    store: &'s S,
    keyring: &'s K,
    registry: UltimateRegistry,
    trust_opts: TrustOptions,
}

impl<'s, S: RecordStore, K: Keyring> Context<'s, S, K> {
    /// Builds a context and populates the ultimate-root registry by
    /// enumerating every locally held secret key (spec §4.3), resolving
    /// hint lists for any promotion that enumeration triggers. Mirrors the
    /// teacher's `Ssi::new` in shape: one call that both constructs and
    /// bootstraps, rather than leaving the registry to be populated by a
    /// separate step a caller could forget.
    pub fn bootstrap(store: &'s S, keyring: &'s K, trust_opts: TrustOptions) -> Result<Self, CoreError> {
        let mut registry = UltimateRegistry::new();
        let updater = Updater::new(store, keyring);
        registry.bootstrap(store, keyring, &updater)?;
        Ok(Context {
            store,
            keyring,
            registry,
            trust_opts,
        })
    }

    pub fn registry(&self) -> &UltimateRegistry { &self.registry }

    pub fn trust_options(&self) -> &TrustOptions { &self.trust_opts }

    fn updater(&self) -> Updater<'_, S, K> { Updater::new(self.store, self.keyring) }

    /// Inserts a new primary key and rebuilds its sub-graph (spec §4.4
    /// entry points `insert`/`update`, fully run together as one op).
    pub fn insert(&self, pk: &K::Pk) -> Result<UpdateStats, CoreError> {
        let outcome = self.updater().insert(pk)?;
        if let Some(hintlist) = outcome.promoted_hintlist {
            crate::hints::resolve(self.store, self.keyring, outcome.dir_lid, hintlist)?;
        }
        self.store.sync().map_err(|_| crate::error::CorruptionError::SyncFailed)?;
        Ok(UpdateStats { modified: true })
    }

    /// Rebuilds an already-known key's sub-graph from a fresh keyblock
    /// (spec §4.4 `update`).
    pub fn update(
        &self,
        keyblock: &crate::keyblock::Keyblock<K::Pk, K::Sig>,
    ) -> Result<UpdateStats, CoreError> {
        let stats = self.updater().update(keyblock)?;
        self.store.sync().map_err(|_| crate::error::CorruptionError::SyncFailed)?;
        Ok(stats)
    }

    /// Spec §4.6 `check_trust`.
    pub fn check_trust(&self, pk: &K::Pk, now: u64) -> Result<TrustResult, CoreError> {
        trust::check_trust(self.store, self.keyring, &self.registry, &self.trust_opts, pk, now)
    }

    /// Spec §9's "signature lister": every certification edge reachable
    /// from `pk`, cycle-safe via the visited set C3 describes.
    pub fn list_signatures(&self, pk: &K::Pk) -> Result<Vec<crate::sigiter::SigEdge>, CoreError> {
        let fpr = self.keyring.fingerprint_from_pk(pk);
        let dir_lid = match self.store.search_dir_byfpr(&fpr) {
            Some(lid) => lid,
            None => self.updater().insert(pk)?.dir_lid,
        };
        crate::sigiter::list_signatures(self.store, dir_lid)
    }

    /// Spec §9's "second trust walker", `list_trust_path`.
    pub fn list_trust_path(&self, pk: &K::Pk) -> Result<TrustPath, CoreError> {
        let fpr = self.keyring.fingerprint_from_pk(pk);
        let dir_lid = match self.store.search_dir_byfpr(&fpr) {
            Some(lid) => lid,
            None => self.updater().insert(pk)?.dir_lid,
        };
        trust::list_trust_path(self.store, self.keyring, &self.registry, &self.trust_opts, dir_lid)
    }

    /// Spec §4.7 export.
    pub fn export_ownertrust(&self, sink: &mut dyn std::io::Write) -> Result<(), crate::ownertrust::OwnerTrustError> {
        crate::ownertrust::export(self.store, sink)
    }

    /// Spec §4.7 import.
    pub fn import_ownertrust(
        &self,
        source: &mut dyn std::io::BufRead,
    ) -> Result<crate::ownertrust::OwnerTrustImport, crate::ownertrust::OwnerTrustError> {
        crate::ownertrust::import(self.store, self.keyring, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ristretto::{RistrettoKeyring, RistrettoSk};
    use crate::record::TrustLevel;
    use crate::store::InMemoryStore;

    #[test]
    fn bootstrap_registers_local_secret_key_as_ultimate() {
        let store = InMemoryStore::new();
        let keyring = RistrettoKeyring::new();
        let sk = RistrettoSk::generate();
        keyring.add_secret(sk);
        let sk = keyring.enum_secret_keys().remove(0);
        let pk = sk.public_key();

        let ctx = Context::bootstrap(&store, &keyring, TrustOptions::default()).unwrap();
        assert_eq!(ctx.registry().len(), 1);

        let result = ctx.check_trust(&pk, 0).unwrap();
        assert_eq!(result.level, TrustLevel::Ultimate);
    }
}
