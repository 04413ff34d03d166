//! Captured frames and their process-wide identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::image::ImageBuffer;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(0);

/// A delivered frame.
///
/// Carries the image exactly as produced by the pipeline plus an identifier
/// that increases monotonically across all cameras in the process. A separate
/// working image is cloned from the original the first time a caller asks to
/// mutate the frame, so read-only consumers never pay for the copy.
#[derive(Debug, Clone)]
pub struct Frame {
    id: u64,
    original: ImageBuffer,
    working: Option<ImageBuffer>,
}

impl Frame {
    /// Wrap a pipeline image and assign the next frame identifier.
    #[must_use]
    pub fn new(original: ImageBuffer) -> Self {
        Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            original,
            working: None,
        }
    }

    /// Process-wide frame identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The image as delivered, untouched by any consumer edits.
    #[must_use]
    pub const fn original(&self) -> &ImageBuffer {
        &self.original
    }

    /// Mutable working image, cloned from the original on first access.
    pub fn image(&mut self) -> &mut ImageBuffer {
        self.working.get_or_insert_with(|| self.original.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    fn small_image() -> ImageBuffer {
        ImageBuffer::new(2, 2, 24).expect("valid geometry")
    }

    #[test]
    fn test_ids_increase_monotonically() {
        let first = Frame::new(small_image());
        let second = Frame::new(small_image());
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    (0..100)
                        .map(|_| Frame::new(small_image()).id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("frame thread panicked") {
                assert!(seen.insert(id), "duplicate frame id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn test_working_image_does_not_touch_original() {
        let mut frame = Frame::new(small_image());
        frame.image().flip_horizontal();
        assert_eq!(*frame.original(), small_image());
    }

    #[test]
    fn test_working_image_cloned_once() {
        let data: Vec<u8> = (0..12).collect();
        let source = ImageBuffer::from_raw(2, 2, 24, data).expect("sized to match");
        let mut frame = Frame::new(source);

        frame.image().rotate_180();
        let after_first = frame.image().clone();
        // a second access must return the already-mutated copy
        assert_eq!(*frame.image(), after_first);
        assert_ne!(after_first, *frame.original());
    }
}
