//! Collision-free registry of small integer handles
// Copyright 2025 Francisco F. Pinochet
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


use std::collections::BTreeSet;

/// Holds the ids currently in use and mints new ones.
///
/// Caller-supplied ids are claimed with [`reserve`](Self::reserve); bridge
/// minted ids come from a monotonic cursor that skips anything in use.
#[derive(Debug, Clone)]
pub struct IdentifierRegistry {
    base: u32,
    next: u32,
    in_use: BTreeSet<u32>,
}

impl IdentifierRegistry {
    /// Create a registry whose minted ids start at `base`
    pub fn new(base: u32) -> Self {
        Self {
            base,
            next: base,
            in_use: BTreeSet::new(),
        }
    }

    /// Claim a caller-supplied id. Returns false if it is already held.
    pub fn reserve(&mut self, id: u32) -> bool {
        self.in_use.insert(id)
    }

    /// Mint a fresh id that is not currently held.
    ///
    /// Returns `None` once every id in `[base, u32::MAX]` is taken.
    pub fn allocate(&mut self) -> Option<u32> {
        if self.in_use.range(self.base..).count() as u64 >= self.capacity() {
            return None;
        }

        loop {
            let candidate = self.next;
            self.next = if self.next == u32::MAX {
                self.base
            } else {
                self.next + 1
            };

            if self.in_use.insert(candidate) {
                return Some(candidate);
            }
        }
    }

    /// How many ids the minting range holds
    pub fn capacity(&self) -> u64 {
        u64::from(u32::MAX - self.base) + 1
    }

    /// Give an id back. Unknown ids are ignored.
    pub fn release(&mut self, id: u32) -> bool {
        self.in_use.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.in_use.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_use.clear();
    }
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_monotonic() {
        let mut ids = IdentifierRegistry::new(10000);
        assert_eq!(ids.allocate().unwrap(), 10000);
        assert_eq!(ids.allocate().unwrap(), 10001);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_allocate_skips_reserved() {
        let mut ids = IdentifierRegistry::new(5);
        assert!(ids.reserve(5));
        assert!(ids.reserve(6));
        assert_eq!(ids.allocate().unwrap(), 7);
    }

    #[test]
    fn test_reserve_rejects_duplicate() {
        let mut ids = IdentifierRegistry::new(0);
        assert!(ids.reserve(1));
        assert!(!ids.reserve(1));

        assert!(ids.release(1));
        assert!(ids.reserve(1));
    }

    #[test]
    fn test_released_id_not_reminted_immediately() {
        let mut ids = IdentifierRegistry::new(1);
        let first = ids.allocate().unwrap();
        ids.release(first);
        assert_ne!(ids.allocate().unwrap(), first);
    }

    #[test]
    fn test_wraps_to_base() {
        let mut ids = IdentifierRegistry::new(u32::MAX - 1);
        assert_eq!(ids.allocate().unwrap(), u32::MAX - 1);
        assert_eq!(ids.allocate().unwrap(), u32::MAX);
        ids.release(u32::MAX - 1);
        assert_eq!(ids.allocate().unwrap(), u32::MAX - 1);
    }

    #[test]
    fn test_exhausted_range_returns_none() {
        let mut ids = IdentifierRegistry::new(u32::MAX);
        assert_eq!(ids.capacity(), 1);
        assert_eq!(ids.allocate(), Some(u32::MAX));
        assert_eq!(ids.allocate(), None);
        assert_eq!(ids.allocate(), None);

        ids.release(u32::MAX);
        assert_eq!(ids.allocate(), Some(u32::MAX));
    }

    #[test]
    fn test_ids_below_base_do_not_count_against_range() {
        let mut ids = IdentifierRegistry::new(u32::MAX - 1);
        assert!(ids.reserve(1));
        assert!(ids.reserve(u32::MAX));
        assert_eq!(ids.allocate(), Some(u32::MAX - 1));
        assert_eq!(ids.allocate(), None);
        assert!(ids.contains(1));
    }
}
