//! Most-recent-frame storage.

use std::sync::{Mutex, PoisonError};

use crate::image::ImageBuffer;

/// Single-slot store holding the most recently delivered image.
///
/// Every delivered frame lands here after orientation, whether or not the
/// rate limiter publishes it to subscribers, so polling callers always see
/// the camera's latest output.
#[derive(Debug, Default)]
pub struct LatestFrameStore {
    slot: Mutex<Option<ImageBuffer>>,
}

impl LatestFrameStore {
    /// An empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replace the stored image with `image`.
    pub fn publish(&self, image: ImageBuffer) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
    }

    /// Clone of the most recent image, or `None` before the first delivery.
    #[must_use]
    pub fn snapshot(&self) -> Option<ImageBuffer> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_filled(fill: u8) -> ImageBuffer {
        ImageBuffer::from_raw(2, 2, 24, vec![fill; 12]).expect("sized to match")
    }

    #[test]
    fn test_empty_store_has_no_snapshot() {
        assert!(LatestFrameStore::new().snapshot().is_none());
    }

    #[test]
    fn test_snapshot_matches_published_image() {
        let store = LatestFrameStore::new();
        store.publish(image_filled(7));
        assert_eq!(store.snapshot(), Some(image_filled(7)));
    }

    #[test]
    fn test_publish_replaces_previous_image() {
        let store = LatestFrameStore::new();
        store.publish(image_filled(1));
        store.publish(image_filled(2));
        assert_eq!(store.snapshot(), Some(image_filled(2)));
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let source =
            ImageBuffer::from_raw(2, 1, 24, vec![1, 2, 3, 4, 5, 6]).expect("sized to match");
        let store = LatestFrameStore::new();
        store.publish(source.clone());

        let mut taken = store.snapshot().expect("published above");
        taken.flip_horizontal();
        assert_ne!(taken, source);
        // mutating the copy must not affect what the store hands out next
        assert_eq!(store.snapshot(), Some(source));
    }
}
