use rizmo_common::{DelayedTask, Detection};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NO_CAP: u32 = u32::MAX;

/// Highest priority rank the selector may currently pick. Shared with the
/// reset timer.
#[derive(Debug, Clone)]
pub struct PriorityCap(Arc<AtomicU32>);

impl PriorityCap {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(NO_CAP)))
    }

    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            NO_CAP => None,
            cap => Some(cap),
        }
    }

    pub fn set(&self, cap: u32) {
        self.0.store(cap, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(NO_CAP, Ordering::SeqCst);
    }
}

impl Default for PriorityCap {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowest rank wins, then the larger box. Labels missing from
/// `priorities` or ranked above `cap` are ignored.
pub fn select_target<'a>(
    objects: &'a [Detection],
    priorities: &HashMap<String, u32>,
    cap: Option<u32>,
) -> Option<&'a Detection> {
    objects
        .iter()
        .filter_map(|object| {
            let priority = *priorities.get(&object.label)?;
            cap.map_or(true, |cap| priority <= cap)
                .then_some((priority, object))
        })
        .min_by_key(|(priority, object)| (*priority, Reverse(object.bbox.area())))
        .map(|(_, object)| object)
}

/// Target selection with class hysteresis: after locking onto a class,
/// lower classes are ignored until that class has gone unseen for the
/// hysteresis window.
pub struct TargetSelector {
    priorities: HashMap<String, u32>,
    cap: PriorityCap,
    cap_reset: DelayedTask,
}

impl TargetSelector {
    pub fn new(priorities: HashMap<String, u32>, hysteresis: Duration) -> Self {
        let cap = PriorityCap::new();
        let reset_handle = cap.clone();
        let cap_reset = DelayedTask::new(hysteresis, move || {
            let cap = reset_handle.clone();
            async move {
                debug!("Priority cap expired");
                cap.reset();
            }
        });

        Self {
            priorities,
            cap,
            cap_reset,
        }
    }

    pub fn cap(&self) -> Option<u32> {
        self.cap.get()
    }

    pub async fn select(&mut self, objects: &[Detection]) -> Option<Detection> {
        let target = select_target(objects, &self.priorities, self.cap.get())?.clone();

        if let Some(&priority) = self.priorities.get(&target.label) {
            self.cap.set(priority);
            self.cap_reset.reschedule().await;
        }
        Some(target)
    }
}
