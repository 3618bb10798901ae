//! 运行统计, 由推流线程写入, HTTP 接口读取

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    lobby_count: AtomicU32,
    active_identities: AtomicU64,
    frames_ingested: AtomicU64,
    frames_processed: AtomicU64,
    frames_emitted: AtomicU64,
    events_emitted: AtomicU64,
    failed_appends: AtomicU64,
    detection_errors: AtomicU64,
    encoding_errors: AtomicU64,
    sessions: AtomicU64,
}

/// `/api/stats` 响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub lobby_count: u32,
    pub active_identities: u64,
    pub frames_ingested: u64,
    pub frames_processed: u64,
    pub frames_emitted: u64,
    pub events_emitted: u64,
    pub failed_appends: u64,
    pub detection_errors: u64,
    pub encoding_errors: u64,
    pub sessions: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lobby_count: self.lobby_count.load(Ordering::Relaxed),
            active_identities: self.active_identities.load(Ordering::Relaxed),
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            failed_appends: self.failed_appends.load(Ordering::Relaxed),
            detection_errors: self.detection_errors.load(Ordering::Relaxed),
            encoding_errors: self.encoding_errors.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_presence(&self, lobby_count: u32, events: u64, failed_appends: u64) {
        self.lobby_count.store(lobby_count, Ordering::Relaxed);
        self.events_emitted.store(events, Ordering::Relaxed);
        self.failed_appends.store(failed_appends, Ordering::Relaxed);
    }

    pub(crate) fn set_active(&self, active: usize) {
        self.active_identities.store(active as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_emitted(&self) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn detection_error(&self) {
        self.detection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn encoding_error(&self) {
        self.encoding_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_started(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }
}
