//! Single-slot store of the most recently produced frame.
//!
//! Publishing overwrites the slot, there is no queue. Every viewer keeps its own
//! cursor (the last sequence number it saw) and only ever gets the latest frame,
//! so slow viewers drop frames instead of growing memory.
//!
//! Closing the store on shutdown ends all waits, so viewer streams finish.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use cam_source::Frame;
use tokio::sync::Notify;

/// Upper bound for a single wait on a new frame.
pub const IDLE_POLL: Duration = Duration::from_millis(100);

/// A frame as published into the store.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    /// Increments with every publish, starting at 1.
    pub seq: u64,
    pub image: Arc<Frame>,
}

#[derive(Default)]
struct Slot {
    seq: u64,
    frame: Option<Arc<Frame>>,
    closed: bool,
}

#[derive(Default)]
pub struct FrameStore {
    slot: Mutex<Slot>,
    new_frame: Notify,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot is always left consistent, a panicking holder can't tear it
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored frame and wake up waiting viewers.
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let seq = {
            let mut slot = self.lock();
            slot.seq += 1;
            slot.frame = Some(frame);
            slot.seq
        };
        self.new_frame.notify_waiters();
        seq
    }

    /// The current frame, if any was published yet.
    pub fn read(&self) -> Option<PublishedFrame> {
        let slot = self.lock();
        slot.frame.as_ref().map(|image| PublishedFrame {
            seq: slot.seq,
            image: Arc::clone(image),
        })
    }

    /// The current frame if it is newer than `seen`.
    pub fn read_newer(&self, seen: u64) -> Option<PublishedFrame> {
        self.read().filter(|published| published.seq > seen)
    }

    /// Sequence number of the latest publish, 0 if nothing was published.
    pub fn latest_seq(&self) -> u64 {
        self.lock().seq
    }

    /// Stop handing out frames and wake up all waiting viewers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.new_frame.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until a frame newer than `seen` is available.
    ///
    /// Sleeps on the publish notification, re-checking at least every
    /// [`IDLE_POLL`] so a missing capture loop never turns into a busy wait.
    /// Returns `None` once the store is closed.
    pub async fn wait_newer(&self, seen: u64) -> Option<PublishedFrame> {
        loop {
            let notified = self.new_frame.notified();
            tokio::pin!(notified);
            // Register before checking, a publish in between must not be lost
            notified.as_mut().enable();

            {
                let slot = self.lock();
                if slot.closed {
                    return None;
                }
                if let Some(image) = slot.frame.as_ref().filter(|_| slot.seq > seen) {
                    return Some(PublishedFrame {
                        seq: slot.seq,
                        image: Arc::clone(image),
                    });
                }
            }

            let _ = tokio::time::timeout(IDLE_POLL, notified).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    use super::*;

    fn solid(value: u8) -> Frame {
        RgbImage::from_pixel(4, 4, Rgb([value, value, value]))
    }

    #[test]
    fn empty_store_reads_nothing() {
        let store = FrameStore::new();
        assert!(store.read().is_none());
        assert_eq!(store.latest_seq(), 0);
    }

    #[test]
    fn publish_overwrites_latest() {
        let store = FrameStore::new();
        assert_eq!(store.publish(solid(1)), 1);
        assert_eq!(store.publish(solid(2)), 2);

        let latest = store.read().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.image.get_pixel(0, 0), &Rgb([2, 2, 2]));

        assert!(store.read_newer(2).is_none());
        assert_eq!(store.read_newer(1).unwrap().seq, 2);
    }

    #[test]
    fn readers_keep_their_copy() {
        let store = FrameStore::new();
        store.publish(solid(1));
        let held = store.read().unwrap();
        store.publish(solid(9));
        assert_eq!(held.image.get_pixel(0, 0), &Rgb([1, 1, 1]));
    }

    #[tokio::test]
    async fn waiter_wakes_on_publish() {
        let store = Arc::new(FrameStore::new());

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_newer(0).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        store.publish(solid(7));
        let published = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn waiter_skips_seen_frames() {
        let store = FrameStore::new();
        store.publish(solid(1));

        let pending = tokio::time::timeout(Duration::from_millis(250), store.wait_newer(1)).await;
        assert!(pending.is_err());

        store.publish(solid(2));
        assert_eq!(store.wait_newer(1).await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn close_ends_waits() {
        let store = Arc::new(FrameStore::new());

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_newer(0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.close();
        let woken = tokio::time::timeout(Duration::from_millis(50), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(woken.is_none());
        assert!(store.is_closed());

        // Even with frames around, a closed store hands out nothing
        store.publish(solid(3));
        assert!(store.wait_newer(0).await.is_none());
    }
}
