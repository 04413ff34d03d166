//! Webcam-Capture: a V4L2 video capture library with camera property control
//!
//! This library layers a capture session (frame subscriptions, rate
//! throttling, orientation) and a camera property facade over a trait-based
//! backend, enabling both production use with real hardware and testing with
//! mock devices.

pub mod camera;
pub mod device;
pub mod frame;
pub mod image;
pub mod property;
pub mod store;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use camera::{Camera, CaptureConfig, FrameHandler, SubscriptionId};
pub use device::V4l2Backend;
pub use frame::Frame;
pub use image::{ImageBuffer, Orientation};
pub use property::{
    PropertyCapabilities, PropertyKind, PropertyMode, PropertyRange, PropertyValue, Representation,
};
pub use store::LatestFrameStore;
pub use throttle::{FrameThrottle, DEFAULT_CORRECTION_FACTOR};
pub use traits::{
    CameraBackend, CameraError, CaptureSize, DeviceInfo, FrameFormat, FrameSink, Result,
    StopWaiter,
};
