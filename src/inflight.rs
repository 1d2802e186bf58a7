use std::collections::HashSet;
use std::sync::Mutex;

/// Single-slot in-progress markers, one per mutation target. A second
/// mutation of a busy target is refused instead of queued.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<String>>,
}

/// Held for the duration of a mutation; the target is released on drop.
#[derive(Debug)]
pub struct InFlightPermit<'a> {
    registry: &'a InFlight,
    key: String,
}

impl InFlight {
    pub fn try_begin(&self, key: impl Into<String>) -> Option<InFlightPermit<'_>> {
        let key = key.into();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());

        if !active.insert(key.clone()) {
            tracing::warn!(target_key = %key, "Mutation already in flight");
            return None;
        }

        Some(InFlightPermit {
            registry: self,
            key,
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

impl InFlightPermit<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

pub fn schedule_target(grade_id: &str, section_id: &str) -> String {
    format!("schedule:{}:{}", grade_id, section_id)
}

pub fn grade_target(grade_id: &str) -> String {
    format!("grade:{}", grade_id)
}

pub fn section_target(section_id: &str) -> String {
    format!("section:{}", section_id)
}

pub fn new_grade_target(shift: &str, name: &str) -> String {
    format!("new-grade:{}:{}", shift, name)
}

pub fn new_section_target(grade_id: &str, name: &str) -> String {
    format!("new-section:{}:{}", grade_id, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_on_busy_target_is_refused() {
        let inflight = InFlight::default();
        let key = schedule_target("g1", "s1");

        let permit = inflight.try_begin(key.clone()).expect("first begin succeeds");
        assert_eq!(permit.key(), key);
        assert!(inflight.try_begin(key.clone()).is_none());
        assert!(inflight.try_begin(schedule_target("g1", "s2")).is_some());

        drop(permit);
        assert!(!inflight.is_active(&key));
        assert!(inflight.try_begin(key).is_some());
    }
}
