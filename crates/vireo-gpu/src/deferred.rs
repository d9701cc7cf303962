//! Retiring resources that in-flight frames may still reference.
//!
//! A buffer or texture replaced during frame N can still be read by the GPU
//! until the frame slot that recorded N comes around again. Entries are
//! tagged with the frame they were retired in and dropped (which releases
//! them, see [`crate::resource::Buffer`]) once the scheduler has waited on
//! every fence that could cover them.

use std::collections::VecDeque;

struct Retired<T> {
    resource: T,
    frame: u64,
}

/// FIFO of retired resources keyed by frame number.
pub struct DeferredDeletionQueue<T> {
    pending: VecDeque<Retired<T>>,
    frames_in_flight: usize,
}

impl<T> DeferredDeletionQueue<T> {
    /// Entries survive `frames_in_flight` further frames before being dropped.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Queue a resource for deferred deletion.
    pub fn queue(&mut self, resource: T, frame_number: u64) {
        self.pending.push_back(Retired {
            resource,
            frame: frame_number,
        });
    }

    /// Drop every resource that is old enough. Returns how many were dropped.
    ///
    /// Call this at the start of each frame.
    pub fn process(&mut self, current_frame_number: u64) -> usize {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);
        let mut dropped = 0;

        // Frame numbers are non-decreasing, so only the front can mature.
        while let Some(front) = self.pending.front() {
            if front.frame >= cutoff {
                break;
            }
            if let Some(pending) = self.pending.pop_front() {
                drop(pending.resource);
                dropped += 1;
            }
        }
        dropped
    }

    /// Drop all pending resources immediately.
    ///
    /// Call this during shutdown after the device is idle.
    pub fn flush(&mut self) {
        self.pending.clear();
    }

    /// Get the number of pending deletions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Update the frames in flight count.
    ///
    /// Call this when the swapchain is recreated with a different image count.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn resources_live_for_frames_in_flight() {
        let marker = Rc::new(());
        let mut queue = DeferredDeletionQueue::new(2);
        queue.queue(Rc::clone(&marker), 10);

        assert_eq!(queue.process(11), 0);
        assert_eq!(queue.process(12), 0);
        assert_eq!(Rc::strong_count(&marker), 2);

        assert_eq!(queue.process(13), 1);
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn flush_drops_everything() {
        let mut queue = DeferredDeletionQueue::new(3);
        queue.queue(vec![1u8], 0);
        queue.queue(vec![2u8], 1);
        queue.flush();
        assert_eq!(queue.pending_count(), 0);
    }
}
