//! 最后出现帧记录 (显示用)
//!
//! Entries are dropped only when the identity is no longer active and it was
//! last seen more than `retention` frames ago.

use std::collections::{BTreeMap, HashSet};

use crate::detection::IdentityId;

pub struct StaleMemory {
    last_seen: BTreeMap<IdentityId, u64>,
    retention: u64,
}

impl StaleMemory {
    pub fn new(retention: u64) -> Self {
        Self {
            last_seen: BTreeMap::new(),
            retention,
        }
    }

    /// 记录身份在某帧出现
    pub fn touch(&mut self, id: IdentityId, frame_index: u64) {
        self.last_seen.insert(id, frame_index);
    }

    pub fn last_seen(&self, id: IdentityId) -> Option<u64> {
        self.last_seen.get(&id).copied()
    }

    /// 清理过期记录, 返回被清理的ID
    pub fn reap(&mut self, active: &HashSet<IdentityId>, frame_index: u64) -> Vec<IdentityId> {
        let retention = self.retention;
        let stale: Vec<IdentityId> = self
            .last_seen
            .iter()
            .filter(|&(id, _)| !active.contains(id))
            .filter(|&(_, &seen)| frame_index.saturating_sub(seen) > retention)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.last_seen.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_survives_window_then_reaped() {
        let mut memory = StaleMemory::new(90);
        memory.touch(7, 10);
        let active = HashSet::new();

        for frame in 11..=100 {
            assert!(memory.reap(&active, frame).is_empty());
        }
        assert_eq!(memory.last_seen(7), Some(10));

        assert_eq!(memory.reap(&active, 101), vec![7]);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_active_identity_never_reaped() {
        let mut memory = StaleMemory::new(90);
        memory.touch(1, 0);
        let active: HashSet<IdentityId> = [1].into_iter().collect();
        assert!(memory.reap(&active, 10_000).is_empty());
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_touch_refreshes_entry() {
        let mut memory = StaleMemory::new(5);
        memory.touch(3, 1);
        memory.touch(3, 20);
        assert!(memory.reap(&HashSet::new(), 24).is_empty());
        assert_eq!(memory.reap(&HashSet::new(), 26), vec![3]);
    }
}
