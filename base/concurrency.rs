// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! A registry of named, weighted, hot-reloadable concurrency limits.
//!
//! Every worker pool in the core (RTSP capture launches, transcoder
//! invocations, S3 uploads) acquires a permit from a named [`Gate`] here
//! rather than holding its own `Semaphore`, so an operator can resize one
//! limit from the config file without restarting the process and without
//! kicking out work already in flight.
//!
//! A plain `tokio::sync::Semaphore` can't do this: shrinking it means
//! forgetting permits that may currently be held by someone else. Instead
//! each gate tracks `capacity` and `in_flight` behind a mutex and wakes
//! waiters with a `Notify`; an acquire only succeeds while `in_flight +
//! weight <= capacity`, so a shrink takes effect as current holders release,
//! never by evicting them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct GateState {
    capacity: usize,
    /// Held permits counted against `capacity`. Always `<= capacity`.
    in_flight: usize,
    /// Held permits left over from a shrink that no longer fit in
    /// `capacity`. Not counted in `in_flight`/reported by [`Gate::current`],
    /// but still occupying real concurrency until their holder releases
    /// them; released before `in_flight` is touched so a shrink's excess
    /// drains first.
    excess: usize,
}

struct Gate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Gate {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Gate {
            state: Mutex::new(GateState {
                capacity,
                in_flight: 0,
                excess: 0,
            }),
            notify: Notify::new(),
        })
    }

    async fn acquire(self: &Arc<Self>, weight: usize) -> Permit {
        loop {
            let notified = self.notify.notified();
            {
                let mut s = self.state.lock().unwrap();
                if s.in_flight + weight <= s.capacity {
                    s.in_flight += weight;
                    return Permit {
                        gate: self.clone(),
                        weight,
                    };
                }
            }
            notified.await;
        }
    }

    fn release(&self, weight: usize) {
        {
            let mut s = self.state.lock().unwrap();
            // Drain `excess` first: those permits were left over from a
            // shrink and were never counted against `capacity`, so freeing
            // them must not touch `in_flight` either.
            let from_excess = weight.min(s.excess);
            s.excess -= from_excess;
            let remaining = weight - from_excess;
            s.in_flight = s.in_flight.saturating_sub(remaining);
        }
        self.notify.notify_waiters();
    }

    /// Swaps in `new_capacity`, re-bucketing every currently held permit so
    /// `in_flight <= new_capacity` holds immediately: up to `new_capacity` of
    /// the held weight stays counted as `in_flight`, and anything beyond
    /// that becomes `excess`, invisible to `current()` but still occupying
    /// real concurrency until its holder drops its permit.
    fn resize(&self, new_capacity: usize) {
        {
            let mut s = self.state.lock().unwrap();
            let held = s.in_flight + s.excess;
            s.capacity = new_capacity;
            s.in_flight = held.min(new_capacity);
            s.excess = held.saturating_sub(new_capacity);
        }
        self.notify.notify_waiters();
    }

    fn current(&self) -> (usize, usize) {
        let s = self.state.lock().unwrap();
        (s.capacity, s.in_flight)
    }
}

/// Held while work is in flight; releases its weight back to the gate on drop.
pub struct Permit {
    gate: Arc<Gate>,
    weight: usize,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release(self.weight);
    }
}

/// A registry of named gates, keyed by a short identifier such as `"capture"`
/// or `"upload"`.
#[derive(Default)]
pub struct Controller {
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a gate with the given initial capacity, or is a no-op if
    /// one by that name already exists (startup may call this once per
    /// configured limit; re-registration happens through [`Self::resize`]).
    pub fn register(&self, name: &str, capacity: usize) {
        let mut gates = self.gates.lock().unwrap();
        gates
            .entry(name.to_string())
            .or_insert_with(|| Gate::new(capacity));
    }

    /// Acquires one unit of weight from the named gate, waiting until
    /// capacity is available. Panics if `name` was never [`register`](Self::register)ed.
    pub async fn acquire(&self, name: &str) -> Permit {
        self.acquire_weighted(name, 1).await
    }

    pub async fn acquire_weighted(&self, name: &str, weight: usize) -> Permit {
        let gate = self.gate(name);
        gate.acquire(weight).await
    }

    /// Changes a gate's capacity in place. Permits already held keep
    /// running to completion, but a shrink immediately caps what
    /// `current()` reports at the new capacity (the excess held weight is
    /// tracked internally and throttles new acquires until it drains).
    pub fn resize(&self, name: &str, new_capacity: usize) {
        self.gate(name).resize(new_capacity);
    }

    /// Returns `(capacity, in_flight)` for the named gate.
    pub fn current(&self, name: &str) -> (usize, usize) {
        self.gate(name).current()
    }

    fn gate(&self, name: &str) -> Arc<Gate> {
        let gates = self.gates.lock().unwrap();
        gates
            .get(name)
            .unwrap_or_else(|| panic!("concurrency gate {name:?} was never registered"))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_blocks_until_capacity_frees() {
        let c = Controller::new();
        c.register("capture", 1);
        let p1 = c.acquire("capture").await;
        assert_eq!(c.current("capture"), (1, 1));

        let acquired_second = Arc::new(tokio::sync::Notify::new());
        let acquired_second2 = acquired_second.clone();
        let c = Arc::new(c);
        let c2 = c.clone();
        let handle = tokio::spawn(async move {
            let _p2 = c2.acquire("capture").await;
            acquired_second2.notify_one();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.current("capture"), (1, 1)); // still blocked

        drop(p1);
        tokio::time::timeout(Duration::from_secs(1), acquired_second.notified())
            .await
            .expect("second acquire should unblock after first releases");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resize_preserves_held_permits() {
        let c = Controller::new();
        c.register("upload", 4);
        let p1 = c.acquire("upload").await;
        let p2 = c.acquire("upload").await;
        assert_eq!(c.current("upload"), (4, 2));

        // Shrink below the currently held count: both permits keep running,
        // but `current()` must never report in_flight above capacity, so
        // one of the two held permits becomes untracked "excess" until it's
        // released.
        c.resize("upload", 1);
        assert_eq!(c.current("upload"), (1, 1));

        drop(p1);
        drop(p2);
        assert_eq!(c.current("upload"), (1, 0));

        let p3 = c.acquire("upload").await;
        assert_eq!(c.current("upload"), (1, 1));
        drop(p3);
    }

    #[tokio::test]
    #[should_panic(expected = "never registered")]
    async fn acquire_unregistered_gate_panics() {
        let c = Controller::new();
        c.acquire("nonexistent").await;
    }
}
