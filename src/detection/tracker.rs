//! 质心跟踪器
//! Centroid tracker: greedy nearest-neighbour identity matching across frames
//!
//! 核心思想:
//! 1. 按检测输入顺序逐个匹配, 先到的检测优先挑选未被占用的身份
//! 2. 距离严格小于 `max_distance` 才算匹配, 否则分配新ID
//! 3. 未匹配的身份丢失计数 +1, 超过 `max_disappeared` 即退役 (ID 永不复用)
//!
//! Identities are kept in a `BTreeMap`, so candidates are always scanned in
//! ascending id order and a distance tie goes to the oldest identity.

use std::collections::BTreeMap;

use super::types::Point;

/// 身份ID (单调递增, 不复用)
pub type IdentityId = u64;

/// 跟踪参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// 最大匹配距离 (像素)
    pub max_distance: f32,
    /// 最大允许连续丢失帧数
    pub max_disappeared: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_distance: 70.0,
            max_disappeared: 12,
        }
    }
}

/// 跟踪身份
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: IdentityId,
    pub last_centroid: Point,
    /// 连续丢失帧数
    pub disappeared: u32,
}

/// 单次 `update` 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    /// 每个检测对应的身份 (与输入顺序一致)
    pub assignments: Vec<Option<IdentityId>>,
    /// 本帧新建的身份
    pub created: Vec<IdentityId>,
    /// 本帧退役的身份
    pub expired: Vec<IdentityId>,
}

pub struct CentroidTracker {
    config: TrackerConfig,
    identities: BTreeMap<IdentityId, Identity>,
    next_id: IdentityId,
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            identities: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// 更新跟踪 (单遍贪心最近邻)
    ///
    /// Never fails and never blocks. Every previously active identity that no
    /// detection claimed ages by exactly one frame.
    pub fn update(&mut self, centroids: &[Point]) -> TrackUpdate {
        let mut update = TrackUpdate {
            assignments: Vec::with_capacity(centroids.len()),
            ..Default::default()
        };

        // 上一帧的活跃身份才是候选, 本帧新建的身份不参与后续匹配
        let mut claimed: BTreeMap<IdentityId, Point> = BTreeMap::new();
        let mut fresh: Vec<Identity> = Vec::new();

        for centroid in centroids {
            let mut best: Option<(IdentityId, f32)> = None;
            for (id, identity) in &self.identities {
                if claimed.contains_key(id) {
                    continue;
                }
                let dist = centroid.distance(&identity.last_centroid);
                if dist >= self.config.max_distance {
                    continue;
                }
                if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                    best = Some((*id, dist));
                }
            }

            match best {
                Some((id, _)) => {
                    claimed.insert(id, *centroid);
                    update.assignments.push(Some(id));
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    fresh.push(Identity {
                        id,
                        last_centroid: *centroid,
                        disappeared: 0,
                    });
                    update.created.push(id);
                    update.assignments.push(Some(id));
                }
            }
        }

        // 匹配成功: 刷新位置, 丢失计数清零; 未匹配: 丢失计数 +1
        let max_disappeared = self.config.max_disappeared;
        for (id, identity) in self.identities.iter_mut() {
            match claimed.get(id) {
                Some(centroid) => {
                    identity.last_centroid = *centroid;
                    identity.disappeared = 0;
                }
                None => {
                    identity.disappeared += 1;
                    if identity.disappeared > max_disappeared {
                        update.expired.push(*id);
                    }
                }
            }
        }
        for id in &update.expired {
            self.identities.remove(id);
        }
        for identity in fresh {
            self.identities.insert(identity.id, identity);
        }

        update
    }

    /// 当前活跃身份 (按ID升序)
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    /// 活跃身份数量
    pub fn active_count(&self) -> usize {
        self.identities.len()
    }

    /// 历史上分配过的身份总数
    pub fn total_created(&self) -> u64 {
        self.next_id
    }
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tracker(max_distance: f32, max_disappeared: u32) -> CentroidTracker {
        CentroidTracker::new(TrackerConfig {
            max_distance,
            max_disappeared,
        })
    }

    fn random_frames(seed: u64, frames: usize) -> Vec<Vec<Point>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..frames)
            .map(|_| {
                let n = rng.gen_range(0..6);
                (0..n)
                    .map(|_| Point::new(rng.gen_range(0.0..400.0), rng.gen_range(0.0..300.0)))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_first_detection_creates_identity_zero() {
        let mut t = tracker(50.0, 10);
        let update = t.update(&[Point::new(10.0, 10.0)]);
        assert_eq!(update.assignments, vec![Some(0)]);
        assert_eq!(update.created, vec![0]);
        assert_eq!(t.active_count(), 1);
    }

    #[test]
    fn test_nearby_detection_keeps_identity() {
        let mut t = tracker(50.0, 10);
        t.update(&[Point::new(10.0, 10.0)]);
        let update = t.update(&[Point::new(15.0, 12.0)]);
        assert_eq!(update.assignments, vec![Some(0)]);
        let identity = t.get(0).unwrap();
        assert_eq!(identity.disappeared, 0);
        assert_eq!(identity.last_centroid, Point::new(15.0, 12.0));
    }

    #[test]
    fn test_far_detection_gets_new_identity() {
        let mut t = tracker(50.0, 10);
        t.update(&[Point::new(10.0, 10.0)]);
        let update = t.update(&[Point::new(200.0, 200.0)]);
        assert_eq!(update.assignments, vec![Some(1)]);
        assert_eq!(t.get(0).unwrap().disappeared, 1);
        assert_eq!(t.active_count(), 2);
    }

    #[test]
    fn test_distance_must_be_strictly_below_threshold() {
        let mut t = tracker(50.0, 10);
        t.update(&[Point::new(0.0, 0.0)]);
        let update = t.update(&[Point::new(50.0, 0.0)]);
        assert_eq!(update.assignments, vec![Some(1)]);
    }

    #[test]
    fn test_identity_expires_after_budget_and_id_not_reused() {
        let max_disappeared = 12;
        let mut t = tracker(50.0, max_disappeared);
        t.update(&[Point::new(10.0, 10.0)]);

        for _ in 0..max_disappeared {
            let update = t.update(&[]);
            assert!(update.expired.is_empty());
        }
        assert_eq!(t.get(0).unwrap().disappeared, max_disappeared);

        let update = t.update(&[]);
        assert_eq!(update.expired, vec![0]);
        assert_eq!(t.active_count(), 0);

        let update = t.update(&[Point::new(10.0, 10.0)]);
        assert_eq!(update.assignments, vec![Some(1)]);
    }

    #[test]
    fn test_earlier_detection_gets_first_choice() {
        let mut t = tracker(100.0, 10);
        t.update(&[Point::new(0.0, 0.0)]);
        // 第二个检测更近, 但第一个检测先挑选
        let update = t.update(&[Point::new(30.0, 0.0), Point::new(5.0, 0.0)]);
        assert_eq!(update.assignments, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let mut t = tracker(100.0, 10);
        t.update(&[Point::new(0.0, 0.0), Point::new(20.0, 0.0)]);
        let update = t.update(&[Point::new(10.0, 0.0)]);
        assert_eq!(update.assignments, vec![Some(0)]);
        assert_eq!(t.get(1).unwrap().disappeared, 1);
    }

    #[test]
    fn test_one_to_one_matching() {
        let mut t = tracker(100.0, 10);
        t.update(&[Point::new(0.0, 0.0)]);
        let update = t.update(&[Point::new(1.0, 0.0), Point::new(2.0, 0.0)]);
        assert_eq!(update.assignments, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_new_identity_not_claimed_within_same_frame() {
        let mut t = tracker(100.0, 10);
        let update = t.update(&[Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        assert_eq!(update.assignments, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_empty_updates_age_identities() {
        let mut t = tracker(50.0, 5);
        t.update(&[Point::new(0.0, 0.0), Point::new(200.0, 0.0)]);
        for _ in 0..3 {
            let update = t.update(&[]);
            assert!(update.created.is_empty());
        }
        assert!(t.identities().all(|i| i.disappeared == 3));
        assert_eq!(t.total_created(), 2);
    }

    #[test]
    fn test_active_set_matches_budget() {
        let config = TrackerConfig {
            max_distance: 40.0,
            max_disappeared: 3,
        };
        let mut t = CentroidTracker::new(config);
        for frame in random_frames(7, 200) {
            t.update(&frame);
            assert!(t.active_count() as u64 <= t.total_created());
            assert!(t.identities().all(|i| i.disappeared <= config.max_disappeared));
        }
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let mut t = tracker(40.0, 3);
        let mut last_created: Option<IdentityId> = None;
        for frame in random_frames(11, 200) {
            let update = t.update(&frame);
            for id in update.created {
                assert!(last_created.map_or(true, |last| id > last));
                last_created = Some(id);
            }
        }
    }

    #[test]
    fn test_deterministic_across_runs() {
        let frames = random_frames(42, 150);
        let run = || {
            let mut t = tracker(60.0, 4);
            let assignments: Vec<_> = frames.iter().map(|f| t.update(f).assignments).collect();
            let active: Vec<_> = t.identities().cloned().collect();
            (assignments, active)
        };
        assert_eq!(run(), run());
    }
}
