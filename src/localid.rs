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

//! A small in-memory LID → payload set (spec §4.1, component C3), used both
//! as the ultimate-root registry ([`crate::ultimate`], payload unused) and
//! for loop detection during signature listing and trust traversal (payload
//! carries a source line number for back-references). Purely in-memory: no
//! persistence, no relationship to the record store.

use std::collections::HashMap;

use crate::ids::Lid;

/// A set of LIDs, each carrying an arbitrary `u32` payload.
#[derive(Clone, Debug, Default)]
pub struct LocalIdSet {
    entries: HashMap<Lid, u32>,
}

impl LocalIdSet {
    pub fn new() -> Self { Self::default() }

    /// Inserts `lid` with `payload`, returning whether it was already
    /// present (its payload is left unchanged in that case).
    pub fn insert(&mut self, lid: Lid, payload: u32) -> bool {
        if self.entries.contains_key(&lid) {
            true
        } else {
            self.entries.insert(lid, payload);
            false
        }
    }

    pub fn lookup(&self, lid: Lid) -> Option<u32> { self.entries.get(&lid).copied() }

    pub fn contains(&self, lid: Lid) -> bool { self.entries.contains_key(&lid) }

    pub fn release(&mut self, lid: Lid) -> Option<u32> { self.entries.remove(&lid) }

    pub fn clear(&mut self) { self.entries.clear(); }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (Lid, u32)> + '_ {
        self.entries.iter().map(|(&lid, &payload)| (lid, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_prior_presence() {
        let mut set = LocalIdSet::new();
        assert!(!set.insert(Lid::new(1), 0));
        assert!(set.insert(Lid::new(1), 7));
        assert_eq!(set.lookup(Lid::new(1)), Some(0));
    }

    #[test]
    fn release_removes_entry() {
        let mut set = LocalIdSet::new();
        set.insert(Lid::new(1), 42);
        assert_eq!(set.release(Lid::new(1)), Some(42));
        assert!(!set.contains(Lid::new(1)));
    }
}
