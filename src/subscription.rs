//! User-facing subscription fanning polls across images

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::buffer::AtomicBuffer;
use crate::conductor::ClientConductor;
use crate::error::Result;
use crate::image::{BlockHandler, Image};
use crate::logbuffer::{ControlledPollAction, Header};

/// A subscriber to one stream on one channel, holding an image per
/// publisher session.
///
/// The image list is a copy-on-write snapshot: the conductor swaps a new
/// `Arc<Vec<_>>` on mutation, pollers clone the current one, so the poll
/// path takes no lock of consequence. Polling itself is single-threaded per
/// subscription by convention, as with the driver's other client libraries.
#[derive(Debug)]
pub struct Subscription {
    conductor: Weak<ClientConductor>,
    channel: String,
    stream_id: i32,
    registration_id: i64,
    channel_status_id: AtomicI32,
    images: RwLock<Arc<Vec<Arc<Image>>>>,
    round_robin_index: AtomicUsize,
    is_closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        conductor: Weak<ClientConductor>,
        channel: String,
        stream_id: i32,
        registration_id: i64,
        channel_status_id: i32,
    ) -> Self {
        Self {
            conductor,
            channel,
            stream_id,
            registration_id,
            channel_status_id: AtomicI32::new(channel_status_id),
            images: RwLock::new(Arc::new(Vec::new())),
            round_robin_index: AtomicUsize::new(0),
            is_closed: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Snapshot of the current images.
    pub fn images(&self) -> Arc<Vec<Arc<Image>>> {
        Arc::clone(&self.images.read().expect("images lock poisoned"))
    }

    pub fn image_count(&self) -> usize {
        self.images().len()
    }

    /// True when at least one publisher session is visible.
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.image_count() > 0
    }

    pub fn image_by_session_id(&self, session_id: i32) -> Option<Arc<Image>> {
        self.images()
            .iter()
            .find(|image| image.session_id() == session_id)
            .cloned()
    }

    /// Poll each image in round-robin order, up to `fragment_limit`
    /// fragments in total.
    pub fn poll<F>(&self, handler: &mut F, fragment_limit: usize) -> usize
    where
        F: FnMut(&AtomicBuffer, usize, usize, &Header),
    {
        if self.is_closed() {
            return 0;
        }

        let images = self.images();
        let length = images.len();
        if length == 0 {
            return 0;
        }

        let starting_index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % length;
        let mut fragments_read = 0;

        for i in 0..length {
            if fragments_read >= fragment_limit {
                break;
            }
            let image = &images[(starting_index + i) % length];
            fragments_read += image.poll(handler, fragment_limit - fragments_read);
        }

        fragments_read
    }

    /// As [`poll`](Self::poll) with the handler controlling consumption.
    pub fn controlled_poll<F>(&self, handler: &mut F, fragment_limit: usize) -> usize
    where
        F: FnMut(&AtomicBuffer, usize, usize, &Header) -> ControlledPollAction,
    {
        if self.is_closed() {
            return 0;
        }

        let images = self.images();
        let length = images.len();
        if length == 0 {
            return 0;
        }

        let starting_index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % length;
        let mut fragments_read = 0;

        for i in 0..length {
            if fragments_read >= fragment_limit {
                break;
            }
            let image = &images[(starting_index + i) % length];
            fragments_read += image.controlled_poll(handler, fragment_limit - fragments_read);
        }

        fragments_read
    }

    /// Poll each image for a contiguous block, at most `block_length_limit`
    /// bytes per image. Returns total bytes consumed.
    pub fn block_poll(&self, handler: BlockHandler, block_length_limit: usize) -> usize {
        if self.is_closed() {
            return 0;
        }

        let images = self.images();
        let mut bytes_consumed = 0;
        for image in images.iter() {
            bytes_consumed += image.block_poll(handler, block_length_limit);
        }
        bytes_consumed
    }

    /// Ask the driver to add a destination to a multi-destination
    /// subscription; blocks until acknowledged.
    pub fn add_destination(&self, channel: &str) -> Result<()> {
        let conductor = self.conductor()?;
        conductor.add_subscription_destination(self.registration_id, channel)
    }

    /// Ask the driver to remove a destination; blocks until acknowledged.
    pub fn remove_destination(&self, channel: &str) -> Result<()> {
        let conductor = self.conductor()?;
        conductor.remove_subscription_destination(self.registration_id, channel)
    }

    /// Close the subscription and release driver resources. Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            if let Some(conductor) = self.conductor.upgrade() {
                conductor.release_subscription(self.registration_id)?;
            }
        }
        Ok(())
    }

    fn conductor(&self) -> Result<Arc<ClientConductor>> {
        self.conductor
            .upgrade()
            .ok_or(crate::error::SeuratError::ClientClosed)
    }

    pub(crate) fn add_image(&self, image: Arc<Image>) {
        let mut guard = self.images.write().expect("images lock poisoned");
        let mut next = (**guard).clone();
        next.push(image);
        *guard = Arc::new(next);
    }

    pub(crate) fn remove_image(&self, correlation_id: i64) -> Option<Arc<Image>> {
        let mut guard = self.images.write().expect("images lock poisoned");
        let position = guard
            .iter()
            .position(|image| image.correlation_id() == correlation_id)?;
        let mut next = (**guard).clone();
        let removed = next.remove(position);
        *guard = Arc::new(next);
        Some(removed)
    }

    pub(crate) fn take_images(&self) -> Vec<Arc<Image>> {
        let mut guard = self.images.write().expect("images lock poisoned");
        let images = (**guard).clone();
        *guard = Arc::new(Vec::new());
        images
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
