//! Mapper state shared between the tracking thread and a mapping thread.
//!
//! Tracking only reads the map, mapping writes it between frames. The
//! `SharedMapper` holds the mapper behind a `parking_lot::RwLock` so a
//! `track` call always sees one consistent snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::tracking::frame::Camera;
use crate::tracking::matching::{FeatureStore, Matcher};
use crate::tracking::pose_solver::OptimizerFactory;
use crate::tracking::tracker::{Mapper, Tracker};
use crate::tracking::tracking_frame::Frame;
use crate::tracking::TrackingResult;

/// Mapper plus tracking counters, shareable across threads.
pub struct SharedMapper<M> {
    /// Protected by RwLock: Tracking reads, Mapping writes.
    mapper: RwLock<M>,

    frames_tracked: AtomicUsize,
    frames_lost: AtomicUsize,
}

impl<M: Mapper> SharedMapper<M> {
    pub fn new(mapper: M) -> Arc<Self> {
        Arc::new(Self {
            mapper: RwLock::new(mapper),
            frames_tracked: AtomicUsize::new(0),
            frames_lost: AtomicUsize::new(0),
        })
    }

    /// Track `frame` against a read snapshot of the mapper.
    pub fn track<T, S, F>(&self, tracker: &Tracker<T, S, F>, frame: &Frame, camera: &Camera) -> TrackingResult
    where
        T: Matcher,
        S: FeatureStore,
        F: OptimizerFactory,
    {
        let result = {
            let mapper = self.mapper.read();
            tracker.track(&*mapper, frame, camera)
        };
        let counter = if result.is_tracked() {
            &self.frames_tracked
        } else {
            &self.frames_lost
        };
        counter.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Mutate the mapper under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut mapper = self.mapper.write();
        f(&mut mapper)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, M> {
        self.mapper.read()
    }

    pub fn frames_tracked(&self) -> usize {
        self.frames_tracked.load(Ordering::SeqCst)
    }

    pub fn frames_lost(&self) -> usize {
        self.frames_lost.load(Ordering::SeqCst)
    }
}
