// SPDX-License-Identifier: MPL-2.0

//! Bounded frame queue between the decoder and the event loop.
//!
//! ```text
//! GStreamer streaming thread --push()--> FrameQueue --try_pop()--> frame pump
//! ```
//!
//! The producer never blocks: when the queue is full the oldest frame is
//! dropped. The consumer never blocks either: when the queue is empty it gets
//! nothing new and keeps showing what it already presented.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use super::Frame;

/// 3 frames hide decode hiccups while keeping latency low.
pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

pub type SharedFrameQueue = Arc<FrameQueue>;

/// A bounded, thread-safe queue of decoded frames.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    stopped: AtomicBool,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            stopped: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn shared(capacity: usize) -> SharedFrameQueue {
        Arc::new(Self::new(capacity))
    }

    /// Pushes a decoded frame, evicting the oldest one when full.
    ///
    /// Returns `false` once the queue has been stopped.
    pub fn push(&self, frame: Frame) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        let Ok(mut frames) = self.frames.try_lock() else {
            // the consumer holds the lock, skip instead of stalling the decoder
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(pts_ns = ?frame.pts, "queue full, evicted oldest frame");
        }

        frames.push_back(frame);
        true
    }

    /// Takes the oldest queued frame, if any. Never blocks.
    pub fn try_pop(&self) -> Option<Frame> {
        self.frames.try_lock().ok()?.pop_front()
    }

    /// Rejects every further frame and discards the queued ones.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }

    /// Frames lost to eviction or contention so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map_or(0, |frames| frames.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copies a possibly padded RGBA plane into a tightly packed image.
pub fn rgba_from_plane(data: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbaImage> {
    let row = width as usize * 4;
    if stride < row || data.len() < stride * (height as usize).saturating_sub(1) + row {
        return None;
    }

    if stride == row {
        return RgbaImage::from_raw(width, height, data[..row * height as usize].to_vec());
    }

    let mut packed = Vec::with_capacity(row * height as usize);
    for line in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&line[..row]);
    }
    RgbaImage::from_raw(width, height, packed)
}
