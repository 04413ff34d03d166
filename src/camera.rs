//! Capture session and the per-property access facade.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::frame::Frame;
use crate::image::{ImageBuffer, Orientation};
use crate::property::{
    PropertyCapabilities, PropertyKind, PropertyMode, PropertyRange, PropertyValue, Representation,
};
use crate::store::LatestFrameStore;
use crate::throttle::{FrameThrottle, DEFAULT_CORRECTION_FACTOR};
use crate::traits::{
    CameraBackend, CameraError, CaptureSize, DeviceInfo, FrameFormat, FrameSink, Result,
};

/// Requested capture geometry and delivery policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    fps_limit: Option<u32>,
    orientation: Orientation,
    throttle_correction: f64,
}

impl Default for CaptureConfig {
    /// 640x480 at 24 bpp, unlimited rate, no orientation transform.
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            bits_per_pixel: 24,
            fps_limit: None,
            orientation: Orientation::None,
            throttle_correction: DEFAULT_CORRECTION_FACTOR,
        }
    }
}

impl CaptureConfig {
    /// Request a capture geometry. The backend may negotiate different values.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Request a pixel depth.
    #[must_use]
    pub const fn with_bits_per_pixel(mut self, bits_per_pixel: u32) -> Self {
        self.bits_per_pixel = bits_per_pixel;
        self
    }

    /// Cap the published frame rate. `0` means unlimited.
    #[must_use]
    pub const fn with_fps_limit(mut self, fps: u32) -> Self {
        self.fps_limit = Some(fps);
        self
    }

    /// Apply an orientation transform to every delivered frame.
    #[must_use]
    pub const fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Tune the throttle's elapsed-time multiplier.
    #[must_use]
    pub const fn with_throttle_correction(mut self, factor: f64) -> Self {
        self.throttle_correction = factor;
        self
    }

    /// Requested width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Requested height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Requested pixel depth.
    #[must_use]
    pub const fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    /// Configured rate ceiling.
    #[must_use]
    pub const fn fps_limit(&self) -> Option<u32> {
        self.fps_limit
    }

    /// Configured orientation transform.
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Configured throttle multiplier.
    #[must_use]
    pub const fn throttle_correction(&self) -> f64 {
        self.throttle_correction
    }
}

/// Handle identifying one frame subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback receiving published frames and the current delivery-rate estimate.
pub type FrameHandler = Box<dyn FnMut(&mut Frame, f64) + Send>;

struct SubscriberEntry {
    id: SubscriptionId,
    /// Taken out for the duration of the call on the delivery thread.
    handler: Option<FrameHandler>,
    /// Unsubscribed from inside its own call; dropped when the call returns.
    removed: bool,
}

struct SubscriberList {
    next_id: u64,
    entries: Vec<SubscriberEntry>,
    /// Thread currently running a handler, if any.
    dispatching: Option<ThreadId>,
}

/// State reachable from the delivery callback without the session lock.
struct PipelineShared {
    store: LatestFrameStore,
    subscribers: Mutex<SubscriberList>,
    /// Signalled each time a handler call returns.
    dispatch_done: Condvar,
    /// Rate ceiling, 0 meaning unlimited.
    fps_limit: AtomicU32,
    orientation: AtomicU8,
    /// Geometry deliveries are interpreted with; requested until the backend
    /// reports what it negotiated.
    negotiated: Mutex<FrameFormat>,
}

struct CameraInner<B> {
    backend: B,
    requested: FrameFormat,
    throttle_correction: f64,
    capturing: bool,
    /// A stop's blocking phase is running with the session lock released.
    stopping: bool,
    disposed: bool,
}

/// A capture session bound to one device.
///
/// Owns the backend, the latest-frame store and the subscriber list. Methods
/// are safe to call from any thread; frame handlers run on the backend's
/// delivery thread with no session or list lock held.
pub struct Camera<B: CameraBackend> {
    inner: Mutex<CameraInner<B>>,
    /// Signalled when a stop's blocking phase settles.
    stop_settled: Condvar,
    shared: Arc<PipelineShared>,
    capabilities: [PropertyCapabilities; PropertyKind::COUNT],
    info: DeviceInfo,
}

impl<B: CameraBackend> Camera<B> {
    /// Bind a session to `backend` and probe per-property capabilities.
    ///
    /// The probe reads each property and, when the read succeeds, writes the
    /// value straight back; a property is settable exactly when that write
    /// is accepted. Capabilities stay fixed for the session's lifetime.
    pub fn new(mut backend: B, config: CaptureConfig) -> Self {
        let capabilities = probe_capabilities(&mut backend);
        let info = backend.info().clone();
        let supported = capabilities
            .iter()
            .filter(|caps| caps.is_supported())
            .count();
        log::info!(
            "camera '{}' ready, {supported} of {} properties supported",
            info.card,
            PropertyKind::COUNT
        );

        let requested = FrameFormat::new(config.width, config.height, config.bits_per_pixel);
        Self {
            inner: Mutex::new(CameraInner {
                backend,
                requested,
                throttle_correction: config.throttle_correction,
                capturing: false,
                stopping: false,
                disposed: false,
            }),
            stop_settled: Condvar::new(),
            shared: Arc::new(PipelineShared {
                store: LatestFrameStore::new(),
                subscribers: Mutex::new(SubscriberList {
                    next_id: 0,
                    entries: Vec::new(),
                    dispatching: None,
                }),
                dispatch_done: Condvar::new(),
                fps_limit: AtomicU32::new(config.fps_limit.unwrap_or(0)),
                orientation: AtomicU8::new(config.orientation.to_bits()),
                negotiated: Mutex::new(requested),
            }),
            capabilities,
            info,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, CameraInner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session lock, taken after any stop in progress has settled.
    fn settled_inner(&self) -> MutexGuard<'_, CameraInner<B>> {
        let mut inner = self.lock_inner();
        while inner.stopping {
            inner = self
                .stop_settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, SubscriberList> {
        lock_subscriber_list(&self.shared)
    }

    /// Begin capturing. Calling while already capturing is a no-op.
    ///
    /// The delivery callback is registered before the backend starts so no
    /// early frame is lost, and the session adopts whatever geometry the
    /// backend reports back.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.settled_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        if inner.capturing {
            return Ok(());
        }

        *self
            .shared
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = inner.requested;
        let sink = self.make_sink(inner.throttle_correction);
        inner.backend.register_frame_sink(sink);

        let mut format = inner.requested;
        if let Err(err) = inner.backend.start(&mut format) {
            inner.backend.clear_frame_sink();
            return Err(err);
        }

        inner.requested = format;
        *self
            .shared
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = format;
        inner.capturing = true;
        log::info!(
            "capture started at {}x{}, {} bpp",
            format.width,
            format.height,
            format.bits_per_pixel
        );
        Ok(())
    }

    /// The full delivery pipeline: convert, orient, store, throttle, publish.
    fn make_sink(&self, throttle_correction: f64) -> FrameSink {
        let shared = Arc::clone(&self.shared);
        let mut throttle = FrameThrottle::with_correction_factor(throttle_correction);
        let mut previous_delivery: Option<Instant> = None;

        Box::new(move |buffer| {
            let now = Instant::now();
            let format = *shared
                .negotiated
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // the borrowed buffer dies with this call, so copy it out first
            let mut image = match ImageBuffer::from_raw(
                format.width,
                format.height,
                format.bits_per_pixel,
                buffer.to_vec(),
            ) {
                Ok(image) => image,
                Err(err) => {
                    log::debug!("dropping delivery: {err}");
                    return;
                }
            };

            image.apply_orientation(Orientation::from_bits(
                shared.orientation.load(Ordering::Relaxed),
            ));
            shared.store.publish(image.clone());

            let ceiling = match shared.fps_limit.load(Ordering::Relaxed) {
                0 => None,
                fps => Some(fps),
            };
            if !throttle.admit(now, ceiling) {
                return;
            }

            // measured against the previous published frame, so the estimate
            // tracks the cadence subscribers actually see
            let fps_estimate = previous_delivery.map_or(0.0, |previous| {
                let seconds = now.duration_since(previous).as_secs_f64();
                if seconds > 0.0 {
                    seconds.recip()
                } else {
                    0.0
                }
            });
            previous_delivery = Some(now);

            let mut frame = Frame::new(image);
            dispatch_frame(&shared, &mut frame, fps_estimate);
        })
    }

    /// Stop capturing. Safe to call when already idle.
    ///
    /// Returns only once delivery has fully ceased: no subscriber is invoked
    /// again until the next [`start`](Self::start). The wait happens with
    /// the session lock released, so a handler inside the final delivery can
    /// still read properties and session state while it runs out.
    pub fn stop(&self) -> Result<()> {
        let inner = self.settled_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        self.shutdown(inner)
    }

    /// Flag the session idle and request backend cancellation under the
    /// lock, then run the backend's blocking waiter with the lock released.
    /// `stopping` keeps lifecycle calls out until the waiter settles.
    fn shutdown(&self, mut inner: MutexGuard<'_, CameraInner<B>>) -> Result<()> {
        if !inner.capturing {
            return Ok(());
        }
        inner.capturing = false;
        inner.stopping = true;
        let requested = inner.backend.stop();
        drop(inner);

        let stopped = match requested {
            Ok(wait) => wait(),
            Err(err) => Err(err),
        };
        self.lock_inner().stopping = false;
        self.stop_settled.notify_all();
        if stopped.is_ok() {
            log::info!("capture stopped");
        }
        stopped
    }

    /// Stop capturing and retire the session.
    ///
    /// Every later operation fails with [`CameraError::Disposed`]; create a
    /// fresh session to capture again. Invoked automatically on drop.
    pub fn dispose(&self) {
        let mut inner = self.settled_inner();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        if let Err(err) = self.shutdown(inner) {
            log::warn!("stop during dispose failed: {err}");
        }
    }

    /// Register `handler` for throttle-accepted frames.
    ///
    /// Handlers run on the backend's delivery thread in subscription order
    /// and share the frame, including its working copy. No lock is held
    /// while a handler runs, so a handler may subscribe or unsubscribe,
    /// itself included; a subscription made mid-delivery first sees the
    /// next frame. A handler must not stop or dispose the session that
    /// invoked it.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&mut Frame, f64) + Send + 'static,
    {
        let mut subscribers = self.lock_subscribers();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push(SubscriberEntry {
            id,
            handler: Some(Box::new(handler)),
            removed: false,
        });
        id
    }

    /// Remove a subscription.
    ///
    /// Waits out a call of the handler already in flight, so once this
    /// returns the handler is guaranteed not to run again. A handler
    /// unsubscribing itself returns immediately; the removal completes when
    /// its current call does.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.lock_subscribers();
        loop {
            let Some(position) = subscribers.entries.iter().position(|entry| entry.id == id)
            else {
                return;
            };
            if subscribers.entries[position].handler.is_some() {
                subscribers.entries.remove(position);
                return;
            }
            if subscribers.dispatching == Some(thread::current().id()) {
                subscribers.entries[position].removed = true;
                return;
            }
            subscribers = self
                .shared
                .dispatch_done
                .wait(subscribers)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Copy of the most recently delivered image, `None` before the first.
    #[must_use]
    pub fn latest_frame(&self) -> Option<ImageBuffer> {
        self.shared.store.snapshot()
    }

    /// Current rate ceiling, `None` when unlimited.
    #[must_use]
    pub fn fps_limit(&self) -> Option<u32> {
        match self.shared.fps_limit.load(Ordering::Relaxed) {
            0 => None,
            fps => Some(fps),
        }
    }

    /// Set or clear the rate ceiling. Takes effect on the next delivery.
    pub fn set_fps_limit(&self, limit: Option<u32>) {
        self.shared
            .fps_limit
            .store(limit.unwrap_or(0), Ordering::Relaxed);
    }

    /// Current orientation transform.
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        Orientation::from_bits(self.shared.orientation.load(Ordering::Relaxed))
    }

    /// Change the orientation transform. Takes effect on the next delivery.
    ///
    /// The requested width and height are swapped whenever the new transform
    /// changes rotation parity.
    pub fn set_orientation(&self, orientation: Orientation) {
        // the session lock serializes the parity check with the swap
        let mut inner = self.lock_inner();
        if self.orientation().swaps_dimensions() != orientation.swaps_dimensions() {
            let requested = &mut inner.requested;
            std::mem::swap(&mut requested.width, &mut requested.height);
        }
        self.shared
            .orientation
            .store(orientation.to_bits(), Ordering::Relaxed);
    }

    /// Whether a capture session is running.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.lock_inner().capturing
    }

    /// The capture geometry: requested before `start`, negotiated after.
    #[must_use]
    pub fn format(&self) -> FrameFormat {
        self.lock_inner().requested
    }

    /// Device display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.card
    }

    /// Identity and feature flags of the device.
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Whether the device exposes `property` at all.
    #[must_use]
    pub fn is_property_supported(&self, property: PropertyKind) -> bool {
        let inner = self.lock_inner();
        !inner.disposed && inner.backend.property_supported(property)
    }

    /// Capability flags probed for `property` at construction.
    #[must_use]
    pub const fn property_capabilities(&self, property: PropertyKind) -> PropertyCapabilities {
        self.capabilities[property.index()]
    }

    /// Read `property` in the requested representation.
    ///
    /// Backend read failures surface as
    /// [`CameraError::PropertyUnavailable`]; callers should display "N/A"
    /// rather than retry.
    pub fn property(
        &self,
        property: PropertyKind,
        representation: Representation,
    ) -> Result<PropertyValue> {
        let inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        let (magnitude, auto) = inner
            .backend
            .property(property, representation)
            .map_err(|err| {
                log::debug!("reading {property} failed: {err}");
                CameraError::PropertyUnavailable(property)
            })?;
        let mode = if auto {
            PropertyMode::Auto
        } else {
            PropertyMode::Manual
        };
        Ok(PropertyValue::new(representation, magnitude, mode))
    }

    /// Write `property`.
    ///
    /// Rejected without reaching the backend unless the capability probe
    /// found the property both gettable and settable.
    pub fn set_property(&self, property: PropertyKind, value: PropertyValue) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        if !self.property_capabilities(property).fully_supported() {
            return Err(CameraError::PropertyNotSettable(property));
        }
        inner.backend.set_property(
            property,
            value.magnitude,
            value.is_auto(),
            value.representation,
        )
    }

    /// Flip only the auto flag of `property`, re-issuing its current
    /// magnitude in `representation`. The backend decides whether the
    /// magnitude is honored while auto is active.
    pub fn set_property_auto(
        &self,
        property: PropertyKind,
        representation: Representation,
        auto: bool,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        if !self.property_capabilities(property).fully_supported() {
            return Err(CameraError::PropertyNotSettable(property));
        }
        let (magnitude, _) = inner
            .backend
            .property(property, representation)
            .map_err(|err| {
                log::debug!("reading {property} failed: {err}");
                CameraError::PropertyUnavailable(property)
            })?;
        inner
            .backend
            .set_property(property, magnitude, auto, representation)
    }

    /// Legal domain of `property`.
    pub fn property_range(&self, property: PropertyKind) -> Result<PropertyRange> {
        let inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        if !self.property_capabilities(property).range_queryable {
            return Err(CameraError::PropertyUnavailable(property));
        }
        inner.backend.property_range(property).map_err(|err| {
            log::debug!("range of {property} failed: {err}");
            CameraError::PropertyUnavailable(property)
        })
    }

    /// Range display text, `"N/A"` when the range cannot be queried.
    #[must_use]
    pub fn range_text(&self, property: PropertyKind) -> String {
        self.property_range(property)
            .map_or_else(|_| "N/A".to_owned(), |range| range.to_string())
    }

    /// Capture sizes offered by the device.
    pub fn capture_sizes(&self) -> Result<Vec<CaptureSize>> {
        let inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        inner.backend.capture_sizes()
    }

    /// Open the backend-owned properties dialog, if it has one.
    pub fn show_properties_dialog(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.disposed {
            return Err(CameraError::Disposed);
        }
        inner.backend.show_properties_dialog()
    }
}

impl<B: CameraBackend> Drop for Camera<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock_subscriber_list(shared: &PipelineShared) -> MutexGuard<'_, SubscriberList> {
    shared
        .subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Run every handler subscribed at dispatch time, in subscription order.
///
/// The list lock is released while each handler runs; a handler taken out
/// for its call is restored afterwards unless it unsubscribed itself.
fn dispatch_frame(shared: &PipelineShared, frame: &mut Frame, fps_estimate: f64) {
    let ids: Vec<SubscriptionId> = lock_subscriber_list(shared)
        .entries
        .iter()
        .map(|entry| entry.id)
        .collect();

    for id in ids {
        let mut handler = {
            let mut list = lock_subscriber_list(shared);
            let Some(entry) = list.entries.iter_mut().find(|entry| entry.id == id) else {
                continue;
            };
            let Some(handler) = entry.handler.take() else {
                continue;
            };
            list.dispatching = Some(thread::current().id());
            handler
        };
        handler(frame, fps_estimate);

        let mut list = lock_subscriber_list(shared);
        list.dispatching = None;
        if let Some(position) = list.entries.iter().position(|entry| entry.id == id) {
            if list.entries[position].removed {
                list.entries.remove(position);
            } else {
                list.entries[position].handler = Some(handler);
            }
        }
        drop(list);
        shared.dispatch_done.notify_all();
    }
}

/// Derive per-property capability flags from the backend.
fn probe_capabilities<B: CameraBackend>(
    backend: &mut B,
) -> [PropertyCapabilities; PropertyKind::COUNT] {
    let mut capabilities = [PropertyCapabilities::default(); PropertyKind::COUNT];
    for kind in PropertyKind::ALL {
        let read = backend.property(kind, Representation::Absolute);
        let gettable = read.is_ok();
        // writing back the value just read proves set works without moving
        // the actual setting
        let settable = match read {
            Ok((value, auto)) => backend
                .set_property(kind, value, auto, Representation::Absolute)
                .is_ok(),
            Err(_) => false,
        };
        let range_queryable = backend.property_range(kind).is_ok();
        capabilities[kind.index()] = PropertyCapabilities::new(gettable, settable, range_queryable);
    }
    capabilities
}
