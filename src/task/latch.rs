// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::common::status::Status;

struct LatchState<K, V> {
    count: usize,
    marks: Vec<(K, V)>,
    status: Status,
}

/// Count-down latch whose expected completions are registered as `(key, value)` marks, used to
/// wait for acknowledgements from many backends.
///
/// The first non-OK status reported through [`count_down_with_status`] or
/// [`count_down_to_zero`] is kept; later reports never overwrite it.
///
/// [`count_down_with_status`]: MarkedCountDownLatch::count_down_with_status
/// [`count_down_to_zero`]: MarkedCountDownLatch::count_down_to_zero
pub struct MarkedCountDownLatch<K, V> {
    state: Mutex<LatchState<K, V>>,
    cv: Condvar,
}

impl<K, V> MarkedCountDownLatch<K, V>
where
    K: PartialEq + Clone,
    V: PartialEq + Clone,
{
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState {
                count,
                marks: Vec::with_capacity(count),
                status: Status::ok(),
            }),
            cv: Condvar::new(),
        }
    }

    pub fn add_mark(&self, key: K, value: V) {
        let mut guard = self.state.lock().expect("latch lock");
        guard.marks.push((key, value));
    }

    /// Counts down once for a registered mark. Returns false if the mark is unknown or was
    /// already counted.
    pub fn count_down(&self, key: &K, value: &V) -> bool {
        self.count_down_with_status(key, value, Status::ok())
    }

    pub fn count_down_with_status(&self, key: &K, value: &V, status: Status) -> bool {
        let mut guard = self.state.lock().expect("latch lock");
        let Some(pos) = guard
            .marks
            .iter()
            .position(|(k, v)| k == key && v == value)
        else {
            return false;
        };
        guard.marks.swap_remove(pos);
        if !status.is_ok() && guard.status.is_ok() {
            guard.status = status;
        }
        guard.count = guard.count.saturating_sub(1);
        if guard.count == 0 {
            self.cv.notify_all();
        }
        true
    }

    /// Releases every waiter at once.
    pub fn count_down_to_zero(&self, status: Status) {
        let mut guard = self.state.lock().expect("latch lock");
        if guard.status.is_ok() {
            guard.status = status;
        }
        guard.count = 0;
        self.cv.notify_all();
    }

    /// Blocks until the count reaches zero. Returns false on timeout.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().expect("latch lock");
        while guard.count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("latch lock");
            guard = next;
        }
        true
    }

    pub fn count(&self) -> usize {
        self.state.lock().expect("latch lock").count
    }

    pub fn status(&self) -> Status {
        self.state.lock().expect("latch lock").status.clone()
    }

    pub fn left_marks(&self) -> Vec<(K, V)> {
        self.state.lock().expect("latch lock").marks.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::MarkedCountDownLatch;
    use crate::common::status::Status;

    #[test]
    fn completes_after_every_mark() {
        let latch = MarkedCountDownLatch::new(3);
        for tablet in 0..3i64 {
            latch.add_mark(1i64, tablet);
        }
        for tablet in 0..3i64 {
            assert!(latch.count_down(&1, &tablet));
        }
        assert!(latch.await_timeout(Duration::from_millis(10)));
        assert!(latch.status().is_ok());
        assert!(latch.left_marks().is_empty());
    }

    #[test]
    fn unknown_or_repeated_mark_does_not_count() {
        let latch = MarkedCountDownLatch::new(2);
        latch.add_mark(1i64, 10i64);
        latch.add_mark(2i64, 10i64);
        assert!(latch.count_down(&1, &10));
        assert!(!latch.count_down(&1, &10));
        assert!(!latch.count_down(&3, &10));
        assert_eq!(latch.count(), 1);
        assert!(!latch.await_timeout(Duration::from_millis(5)));
        assert_eq!(latch.left_marks(), vec![(2, 10)]);
    }

    #[test]
    fn first_failure_wins() {
        let latch = MarkedCountDownLatch::new(3);
        for tablet in 0..3i64 {
            latch.add_mark(1i64, tablet);
        }
        latch.count_down_with_status(&1, &0, Status::internal_error("disk full"));
        latch.count_down_with_status(&1, &1, Status::internal_error("later"));
        latch.count_down(&1, &2);
        assert!(latch.await_timeout(Duration::from_millis(10)));
        assert_eq!(latch.status().error_msg, "disk full");
    }

    #[test]
    fn count_down_to_zero_unblocks_waiter() {
        let latch = Arc::new(MarkedCountDownLatch::new(5));
        for tablet in 0..5i64 {
            latch.add_mark(7i64, tablet);
        }
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || {
                let start = Instant::now();
                let done = latch.await_timeout(Duration::from_secs(30));
                (done, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        latch.count_down_to_zero(Status::cancelled("rollup job cancelled"));
        latch.count_down(&7, &0);
        let (done, elapsed) = waiter.join().expect("waiter");
        assert!(done);
        assert!(elapsed < Duration::from_secs(5));
        let status = latch.status();
        assert!(!status.is_ok());
        assert_eq!(status.error_msg, "rollup job cancelled");
    }
}
