//! Backend seam, error type and shared plain types.

use crate::property::{PropertyKind, PropertyRange, Representation};

/// Negotiated capture geometry: dimensions plus bits per pixel.
///
/// Passed mutably to [`CameraBackend::start`], which may adjust the fields to
/// whatever the device actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bits per pixel of the delivered buffers.
    pub bits_per_pixel: u32,
}

impl FrameFormat {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel,
        }
    }

    /// Expected byte length of one delivered frame buffer.
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        (self.width * self.height * (self.bits_per_pixel / 8)) as usize
    }
}

/// Identity and feature flags of the underlying device.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One capture size the device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSize {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Color depth in bits per pixel.
    pub color_depth: u32,
}

/// Frame-delivery callback registered with a backend.
///
/// The buffer borrow ends when the callback returns; an implementation that
/// needs the data afterwards must copy it out first.
pub type FrameSink = Box<dyn FnMut(&[u8]) + Send>;

/// Deferred wait for capture shutdown, returned by [`CameraBackend::stop`].
///
/// Runs the blocking part of stopping: waiting out the delivery machinery,
/// including any in-flight sink invocation, and releasing the sink. Callers
/// must invoke it without holding locks a sink invocation could take.
pub type StopWaiter = Box<dyn FnOnce() -> Result<()> + Send>;

/// Error type for camera operations.
#[derive(Debug)]
pub enum CameraError {
    /// Device with given index was not found.
    DeviceNotFound(u32),
    /// Failed to open device.
    DeviceOpenFailed(String),
    /// Backend refused to start capture; the session remains idle.
    StartFailed(String),
    /// Session was used after `dispose`.
    Disposed,
    /// Error during streaming operation.
    StreamError(String),
    /// Property value or range could not be retrieved.
    PropertyUnavailable(PropertyKind),
    /// Set was rejected before reaching the backend (capability gate).
    PropertyNotSettable(PropertyKind),
    /// Backend refused to set the property.
    SetFailed(PropertyKind),
    /// Magnitude outside the property's legal domain.
    ValueOutOfRange {
        /// Property the set was aimed at.
        property: PropertyKind,
        /// The rejected magnitude.
        value: i32,
    },
    /// Backend has no properties dialog.
    DialogUnavailable,
    /// I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound(idx) => write!(f, "Device {idx} not found"),
            Self::DeviceOpenFailed(msg) => write!(f, "Failed to open device: {msg}"),
            Self::StartFailed(msg) => write!(f, "Failed to start capture: {msg}"),
            Self::Disposed => write!(f, "Camera has been disposed"),
            Self::StreamError(msg) => write!(f, "Stream error: {msg}"),
            Self::PropertyUnavailable(prop) => write!(f, "Property not available: {prop}"),
            Self::PropertyNotSettable(prop) => write!(f, "Property not settable: {prop}"),
            Self::SetFailed(prop) => write!(f, "Failed to set property: {prop}"),
            Self::ValueOutOfRange { property, value } => {
                write!(f, "Value {value} is outside the range of {property}")
            }
            Self::DialogUnavailable => write!(f, "Device has no properties dialog"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for CameraError {}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the raw-capture backend that owns the device handle.
///
/// A backend is bound to one device at construction. Frames are pushed through
/// the registered [`FrameSink`] from a thread the backend owns; everything
/// else is called synchronously by the session.
pub trait CameraBackend: Send {
    /// Identity and feature flags of the device.
    fn info(&self) -> &DeviceInfo;

    /// Start delivering frames at the requested geometry.
    ///
    /// The backend may adjust `format` to the values it actually negotiated;
    /// callers must adopt the adjusted values.
    fn start(&mut self, format: &mut FrameFormat) -> Result<()>;

    /// Signal capture to cease without waiting for frames in flight.
    ///
    /// The returned waiter blocks until delivery has fully ceased and the
    /// sink is released; no sink invocation happens after the waiter returns.
    /// Callers run the waiter without holding any lock a sink invocation
    /// could take.
    fn stop(&mut self) -> Result<StopWaiter>;

    /// Register the frame-delivery callback. Replaces any previous sink.
    fn register_frame_sink(&mut self, sink: FrameSink);

    /// Deregister the frame-delivery callback.
    ///
    /// Returns only once no sink invocation is in flight.
    fn clear_frame_sink(&mut self);

    /// Whether the device exposes the property at all.
    fn property_supported(&self, property: PropertyKind) -> bool;

    /// Read a property in the given representation.
    ///
    /// Returns `(magnitude, is_auto)`.
    fn property(&self, property: PropertyKind, representation: Representation)
        -> Result<(i32, bool)>;

    /// Write a property in the given representation.
    fn set_property(
        &mut self,
        property: PropertyKind,
        value: i32,
        auto: bool,
        representation: Representation,
    ) -> Result<()>;

    /// Query the legal domain of a property.
    fn property_range(&self, property: PropertyKind) -> Result<PropertyRange>;

    /// Enumerate the capture sizes the device offers.
    fn capture_sizes(&self) -> Result<Vec<CaptureSize>>;

    /// Open the backend-owned properties dialog, if it has one.
    fn show_properties_dialog(&mut self) -> Result<()>;
}
