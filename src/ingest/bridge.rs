//! Single-slot latest-frame cell shared between a live worker and its reader.
//!
//! The worker overwrites the slot on every inbound frame; the reader copies
//! whatever is there. Nothing is queued, so a slow reader only ever sees the
//! newest frame. `Ended` is terminal: once the stream closes, late frames are
//! discarded and every read yields `None`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Contents of the cell.
#[derive(Clone, Debug, PartialEq)]
pub enum LatestFrame {
    /// No frame has arrived yet.
    Pending,
    Frame(Frame),
    /// The stream is over, cleanly or not.
    Ended,
}

/// Outcome of a bounded wait on the cell.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    Frame(Frame),
    Ended,
    /// Still `Pending` when the deadline passed.
    TimedOut,
}

#[derive(Debug)]
pub struct FrameCell {
    slot: Mutex<LatestFrame>,
    changed: Condvar,
}

impl FrameCell {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(LatestFrame::Pending),
            changed: Condvar::new(),
        }
    }

    /// Replace the stored frame. Returns `false` (and drops `frame`) once ended.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut slot = self.lock();
        if *slot == LatestFrame::Ended {
            return false;
        }
        *slot = LatestFrame::Frame(frame);
        drop(slot);
        self.changed.notify_all();
        true
    }

    /// Mark the stream ended. Idempotent.
    pub fn close(&self) {
        *self.lock() = LatestFrame::Ended;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.lock() == LatestFrame::Ended
    }

    pub fn is_pending(&self) -> bool {
        *self.lock() == LatestFrame::Pending
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> LatestFrame {
        self.lock().clone()
    }

    /// Block until the cell leaves `Pending`, re-checking at least every
    /// `poll_interval`. Returns a copy of the frame, never a reference into
    /// the slot.
    pub fn wait_latest(&self, poll_interval: Duration, deadline: Option<Instant>) -> WaitOutcome {
        let mut slot = self.lock();
        loop {
            match &*slot {
                LatestFrame::Frame(frame) => return WaitOutcome::Frame(frame.clone()),
                LatestFrame::Ended => return WaitOutcome::Ended,
                LatestFrame::Pending => {}
            }

            let mut wait = poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                wait = wait.min(deadline - now);
            }

            slot = self
                .changed
                .wait_timeout(slot, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatestFrame> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes the cell when dropped, whichever way the owning scope exits.
pub struct CloseOnDrop<'a>(pub &'a FrameCell);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn newest_frame_wins() {
        let cell = FrameCell::new();
        assert!(cell.is_pending());
        assert!(cell.publish(Frame::filled(1, 1, [1, 1, 1])));
        assert!(cell.publish(Frame::filled(1, 1, [2, 2, 2])));
        assert_eq!(
            cell.wait_latest(Duration::from_millis(5), None),
            WaitOutcome::Frame(Frame::filled(1, 1, [2, 2, 2]))
        );
    }

    #[test]
    fn ended_is_terminal() {
        let cell = FrameCell::new();
        cell.publish(Frame::filled(1, 1, [9, 9, 9]));
        cell.close();
        assert!(!cell.publish(Frame::filled(1, 1, [1, 1, 1])));
        assert_eq!(cell.snapshot(), LatestFrame::Ended);
        assert_eq!(
            cell.wait_latest(Duration::from_millis(5), None),
            WaitOutcome::Ended
        );
    }

    #[test]
    fn pending_wait_respects_deadline() {
        let cell = FrameCell::new();
        let started = Instant::now();
        let outcome = cell.wait_latest(
            Duration::from_millis(5),
            Some(started + Duration::from_millis(30)),
        );
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn waiter_wakes_on_publish_from_another_thread() {
        let cell = Arc::new(FrameCell::new());
        let writer = Arc::clone(&cell);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.publish(Frame::filled(2, 2, [7, 7, 7]));
        });
        let outcome = cell.wait_latest(Duration::from_millis(5), None);
        handle.join().expect("writer thread");
        assert_eq!(outcome, WaitOutcome::Frame(Frame::filled(2, 2, [7, 7, 7])));
    }

    #[test]
    fn guard_closes_on_drop() {
        let cell = FrameCell::new();
        {
            let _guard = CloseOnDrop(&cell);
            cell.publish(Frame::filled(1, 1, [0, 0, 0]));
        }
        assert!(cell.is_closed());
    }
}
