//! In-memory backend for exercising sessions without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::property::{PropertyKind, PropertyRange, Representation};
use crate::traits::{
    CameraBackend, CameraError, CaptureSize, DeviceInfo, FrameFormat, FrameSink, Result,
    StopWaiter,
};

/// One recorded `set_property` call, rejected ones included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCall {
    /// Target property.
    pub property: PropertyKind,
    /// Magnitude passed in.
    pub value: i32,
    /// Auto flag passed in.
    pub auto: bool,
    /// Unit the magnitude was expressed in.
    pub representation: Representation,
}

#[derive(Debug, Clone)]
struct MockControl {
    value: i32,
    auto: bool,
    range: Option<PropertyRange>,
    fail_get: bool,
    fail_set: bool,
}

#[derive(Default)]
struct MockState {
    negotiated: Option<FrameFormat>,
    start_error: Option<String>,
    started: bool,
    start_count: u32,
    stop_count: u32,
    dialog_count: u32,
    controls: [Option<MockControl>; PropertyKind::COUNT],
    set_calls: Vec<SetCall>,
    sizes: Vec<CaptureSize>,
}

/// Scriptable camera backend backed by plain memory.
///
/// Configured through `with_*` methods before handing it to a session;
/// driven and inspected afterwards through a [`MockHandle`].
pub struct MockBackend {
    info: DeviceInfo,
    state: Arc<Mutex<MockState>>,
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A device with no controls that accepts any requested geometry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            state: Arc::new(Mutex::new(MockState::default())),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Add a control with a queryable range, initially manual.
    #[must_use]
    pub fn with_control(self, kind: PropertyKind, range: PropertyRange, value: i32) -> Self {
        self.lock_state().controls[kind.index()] = Some(MockControl {
            value,
            auto: false,
            range: Some(range),
            fail_get: false,
            fail_set: false,
        });
        self
    }

    /// Add a control whose range cannot be queried.
    #[must_use]
    pub fn with_rangeless_control(self, kind: PropertyKind, value: i32) -> Self {
        self.lock_state().controls[kind.index()] = Some(MockControl {
            value,
            auto: false,
            range: None,
            fail_get: false,
            fail_set: false,
        });
        self
    }

    /// Make every write to `kind` fail.
    #[must_use]
    pub fn with_set_failure(self, kind: PropertyKind) -> Self {
        if let Some(control) = self.lock_state().controls[kind.index()].as_mut() {
            control.fail_set = true;
        }
        self
    }

    /// Make every read of `kind` fail.
    #[must_use]
    pub fn with_get_failure(self, kind: PropertyKind) -> Self {
        if let Some(control) = self.lock_state().controls[kind.index()].as_mut() {
            control.fail_get = true;
        }
        self
    }

    /// Fail every start attempt with `message`.
    #[must_use]
    pub fn with_start_error(self, message: &str) -> Self {
        self.lock_state().start_error = Some(message.to_owned());
        self
    }

    /// Negotiate `format` regardless of what is requested.
    #[must_use]
    pub fn with_negotiated(self, format: FrameFormat) -> Self {
        self.lock_state().negotiated = Some(format);
        self
    }

    /// Report `sizes` from the size enumeration.
    #[must_use]
    pub fn with_capture_sizes(self, sizes: Vec<CaptureSize>) -> Self {
        self.lock_state().sizes = sizes;
        self
    }

    /// Use a custom device identity.
    #[must_use]
    pub fn with_info(mut self, info: DeviceInfo) -> Self {
        self.info = info;
        self
    }

    /// Handle for driving deliveries and inspecting calls, valid after the
    /// backend moves into a session.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
            sink: Arc::clone(&self.sink),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraBackend for MockBackend {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self, format: &mut FrameFormat) -> Result<()> {
        let mut state = self.lock_state();
        state.start_count += 1;
        if let Some(message) = &state.start_error {
            return Err(CameraError::StartFailed(message.clone()));
        }
        if let Some(negotiated) = state.negotiated {
            *format = negotiated;
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<StopWaiter> {
        {
            let mut state = self.lock_state();
            state.stop_count += 1;
            state.started = false;
        }
        let sink = Arc::clone(&self.sink);
        Ok(Box::new(move || {
            // taking the cell waits out any in-flight delivery
            sink.lock().unwrap_or_else(PoisonError::into_inner).take();
            Ok(())
        }))
    }

    fn register_frame_sink(&mut self, sink: FrameSink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn clear_frame_sink(&mut self) {
        // taking under the lock waits out any in-flight delivery
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn property_supported(&self, property: PropertyKind) -> bool {
        self.lock_state().controls[property.index()].is_some()
    }

    fn property(
        &self,
        property: PropertyKind,
        representation: Representation,
    ) -> Result<(i32, bool)> {
        let state = self.lock_state();
        let control = state.controls[property.index()]
            .as_ref()
            .filter(|control| !control.fail_get)
            .ok_or(CameraError::PropertyUnavailable(property))?;
        match representation {
            Representation::Absolute => Ok((control.value, control.auto)),
            Representation::Percentage => {
                let range = control
                    .range
                    .ok_or(CameraError::PropertyUnavailable(property))?;
                Ok((range.device_percentage(control.value), control.auto))
            }
        }
    }

    fn set_property(
        &mut self,
        property: PropertyKind,
        value: i32,
        auto: bool,
        representation: Representation,
    ) -> Result<()> {
        let mut state = self.lock_state();
        state.set_calls.push(SetCall {
            property,
            value,
            auto,
            representation,
        });

        // validate before touching the control, like a driver would
        let control = state.controls[property.index()]
            .as_ref()
            .filter(|control| !control.fail_set)
            .ok_or(CameraError::SetFailed(property))?;
        let new_value = match representation {
            Representation::Absolute => {
                if let Some(range) = control.range {
                    if !range.contains(value) {
                        return Err(CameraError::ValueOutOfRange { property, value });
                    }
                }
                value
            }
            Representation::Percentage => {
                if !(0..=100).contains(&value) {
                    return Err(CameraError::ValueOutOfRange { property, value });
                }
                let range = control.range.ok_or(CameraError::SetFailed(property))?;
                range.device_value(value)
            }
        };

        if let Some(control) = state.controls[property.index()].as_mut() {
            control.value = new_value;
            control.auto = auto;
        }
        Ok(())
    }

    fn property_range(&self, property: PropertyKind) -> Result<PropertyRange> {
        self.lock_state().controls[property.index()]
            .as_ref()
            .and_then(|control| control.range)
            .ok_or(CameraError::PropertyUnavailable(property))
    }

    fn capture_sizes(&self) -> Result<Vec<CaptureSize>> {
        Ok(self.lock_state().sizes.clone())
    }

    fn show_properties_dialog(&mut self) -> Result<()> {
        self.lock_state().dialog_count += 1;
        Ok(())
    }
}

/// Test-side view of a [`MockBackend`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl MockHandle {
    /// Push one raw buffer through the registered sink, if any.
    ///
    /// Runs on the calling thread, standing in for the backend's delivery
    /// thread.
    pub fn deliver(&self, buffer: &[u8]) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_mut() {
            sink(buffer);
        }
    }

    /// Drain the recorded `set_property` calls.
    pub fn take_set_calls(&self) -> Vec<SetCall> {
        std::mem::take(&mut self.lock_state().set_calls)
    }

    /// Number of start attempts.
    #[must_use]
    pub fn start_count(&self) -> u32 {
        self.lock_state().start_count
    }

    /// Number of stop calls.
    #[must_use]
    pub fn stop_count(&self) -> u32 {
        self.lock_state().stop_count
    }

    /// Whether the backend believes it is streaming.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// Whether a delivery sink is currently registered.
    #[must_use]
    pub fn sink_registered(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current `(value, auto)` of a control.
    #[must_use]
    pub fn control(&self, property: PropertyKind) -> Option<(i32, bool)> {
        self.lock_state().controls[property.index()]
            .as_ref()
            .map(|control| (control.value, control.auto))
    }

    /// Number of times the properties dialog was opened.
    #[must_use]
    pub fn dialog_count(&self) -> u32 {
        self.lock_state().dialog_count
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_step_backend() -> MockBackend {
        MockBackend::new().with_control(
            PropertyKind::Brightness,
            PropertyRange::new(0, 9, 1, 5, false),
            4,
        )
    }

    #[test]
    fn test_percentage_read_truncates() {
        let backend = ten_step_backend();
        let (pct, auto) = backend
            .property(PropertyKind::Brightness, Representation::Percentage)
            .expect("readable");
        assert_eq!(pct, 40);
        assert!(!auto);
    }

    #[test]
    fn test_percentage_set_spans_full_range() {
        let mut backend = ten_step_backend();
        let handle = backend.handle();

        backend
            .set_property(PropertyKind::Brightness, 100, false, Representation::Percentage)
            .expect("in domain");
        assert_eq!(handle.control(PropertyKind::Brightness), Some((9, false)));

        backend
            .set_property(PropertyKind::Brightness, 50, false, Representation::Percentage)
            .expect("in domain");
        assert_eq!(handle.control(PropertyKind::Brightness), Some((4, false)));
    }

    #[test]
    fn test_percentage_set_rejects_values_past_100() {
        let mut backend = ten_step_backend();
        let err = backend
            .set_property(PropertyKind::Brightness, 101, false, Representation::Percentage)
            .expect_err("out of domain");
        assert!(matches!(err, CameraError::ValueOutOfRange { value: 101, .. }));
    }

    #[test]
    fn test_absolute_set_validates_against_range() {
        let mut backend = ten_step_backend();
        let handle = backend.handle();

        let err = backend
            .set_property(PropertyKind::Brightness, 50, false, Representation::Absolute)
            .expect_err("outside 0..=9");
        assert!(matches!(err, CameraError::ValueOutOfRange { value: 50, .. }));
        // rejected writes leave the control untouched
        assert_eq!(handle.control(PropertyKind::Brightness), Some((4, false)));
    }

    #[test]
    fn test_rejected_sets_are_still_recorded() {
        let mut backend = ten_step_backend();
        let handle = backend.handle();

        let _ = backend.set_property(PropertyKind::Brightness, 50, false, Representation::Absolute);
        let calls = handle.take_set_calls();
        assert_eq!(
            calls,
            [SetCall {
                property: PropertyKind::Brightness,
                value: 50,
                auto: false,
                representation: Representation::Absolute,
            }]
        );
        assert!(handle.take_set_calls().is_empty());
    }

    #[test]
    fn test_percentage_needs_a_range() {
        let backend = MockBackend::new().with_rangeless_control(PropertyKind::Zoom, 3);
        assert!(backend
            .property(PropertyKind::Zoom, Representation::Percentage)
            .is_err());
        assert!(backend
            .property(PropertyKind::Zoom, Representation::Absolute)
            .is_ok());
        assert!(backend.property_range(PropertyKind::Zoom).is_err());
    }

    #[test]
    fn test_get_failure_hides_the_value_not_the_range() {
        let backend = ten_step_backend().with_get_failure(PropertyKind::Brightness);
        assert!(backend
            .property(PropertyKind::Brightness, Representation::Absolute)
            .is_err());
        assert!(backend.property_range(PropertyKind::Brightness).is_ok());
        assert!(backend.property_supported(PropertyKind::Brightness));
    }

    #[test]
    fn test_sink_lifecycle() {
        let mut backend = MockBackend::new();
        let handle = backend.handle();
        assert!(!handle.sink_registered());

        let seen = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&seen);
        backend.register_frame_sink(Box::new(move |_| {
            *counter.lock().expect("counter lock") += 1;
        }));
        assert!(handle.sink_registered());

        handle.deliver(&[0; 4]);
        backend.clear_frame_sink();
        handle.deliver(&[0; 4]);

        assert_eq!(*seen.lock().expect("counter lock"), 1);
        assert!(!handle.sink_registered());
    }

    #[test]
    fn test_stop_waiter_releases_the_sink() {
        let mut backend = MockBackend::new();
        let handle = backend.handle();
        backend.register_frame_sink(Box::new(|_| {}));
        let mut format = FrameFormat::new(2, 1, 24);
        backend.start(&mut format).expect("starts");

        let wait = backend.stop().expect("stop requested");
        // the request alone must leave the sink in place
        assert!(handle.sink_registered());
        assert!(!handle.is_started());

        wait().expect("waiter");
        assert!(!handle.sink_registered());
        assert_eq!(handle.stop_count(), 1);
    }

    #[test]
    fn test_start_negotiates_and_errors() {
        let mut backend = MockBackend::new().with_negotiated(FrameFormat::new(320, 240, 24));
        let mut format = FrameFormat::new(640, 480, 24);
        backend.start(&mut format).expect("starts");
        assert_eq!(format, FrameFormat::new(320, 240, 24));
        assert!(backend.handle().is_started());

        let mut failing = MockBackend::new().with_start_error("no signal");
        let err = failing
            .start(&mut format)
            .expect_err("configured to fail");
        assert!(matches!(err, CameraError::StartFailed(_)));
        assert!(!failing.handle().is_started());
    }
}
