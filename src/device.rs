//! V4L2 backend built on the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Flags as ControlFlags, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::image::yuyv_to_rgb24;
use crate::property::{PropertyKind, PropertyRange, Representation};
use crate::traits::{
    CameraBackend, CameraError, CaptureSize, DeviceInfo, FrameFormat, FrameSink, Result,
    StopWaiter,
};

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_SATURATION: u32 = 0x0098_0902;
const CID_HUE: u32 = 0x0098_0903;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_GAMMA: u32 = 0x0098_0910;
const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_HUE_AUTO: u32 = 0x0098_0919;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_SHARPNESS: u32 = 0x0098_091b;
const CID_BACKLIGHT_COMPENSATION: u32 = 0x0098_091c;
const CID_COLOR_KILLER: u32 = 0x0098_091e;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_PAN_ABSOLUTE: u32 = 0x009a_0908;
const CID_TILT_ABSOLUTE: u32 = 0x009a_0909;
const CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
const CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;
const CID_IRIS_ABSOLUTE: u32 = 0x009a_0911;
const CID_FLASH_LED_MODE: u32 = 0x009c_0901;

/// `V4L2_CID_EXPOSURE_AUTO` menu entries.
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Buffers mapped for streaming.
const BUFFER_COUNT: u32 = 4;

/// Sizes probed when a driver reports a stepwise size envelope.
const COMMON_SIZES: [(u32, u32); 6] = [
    (160, 120),
    (320, 240),
    (640, 480),
    (800, 600),
    (1280, 720),
    (1920, 1080),
];

/// How auto mode is encoded on a companion control.
#[derive(Debug, Clone, Copy)]
enum AutoEncoding {
    /// Boolean control, on means auto.
    Boolean,
    /// `V4L2_CID_EXPOSURE_AUTO` menu, aperture-priority vs manual.
    ExposureMenu,
}

#[derive(Debug, Clone, Copy)]
struct AutoControl {
    id: u32,
    encoding: AutoEncoding,
}

/// The V4L2 controls backing one property.
#[derive(Debug, Clone, Copy)]
struct ControlIds {
    value: u32,
    auto: Option<AutoControl>,
}

/// Controls backing `property`, `None` when V4L2 has no counterpart.
const fn control_ids(property: PropertyKind) -> Option<ControlIds> {
    let (value, auto) = match property {
        PropertyKind::Pan => (CID_PAN_ABSOLUTE, None),
        PropertyKind::Tilt => (CID_TILT_ABSOLUTE, None),
        PropertyKind::Roll => return None,
        PropertyKind::Zoom => (CID_ZOOM_ABSOLUTE, None),
        PropertyKind::Exposure => (
            CID_EXPOSURE_ABSOLUTE,
            Some(AutoControl {
                id: CID_EXPOSURE_AUTO,
                encoding: AutoEncoding::ExposureMenu,
            }),
        ),
        PropertyKind::Iris => (CID_IRIS_ABSOLUTE, None),
        PropertyKind::Focus => (
            CID_FOCUS_ABSOLUTE,
            Some(AutoControl {
                id: CID_FOCUS_AUTO,
                encoding: AutoEncoding::Boolean,
            }),
        ),
        PropertyKind::Flash => (CID_FLASH_LED_MODE, None),
        PropertyKind::Brightness => (CID_BRIGHTNESS, None),
        PropertyKind::Contrast => (CID_CONTRAST, None),
        PropertyKind::Hue => (
            CID_HUE,
            Some(AutoControl {
                id: CID_HUE_AUTO,
                encoding: AutoEncoding::Boolean,
            }),
        ),
        PropertyKind::Saturation => (CID_SATURATION, None),
        PropertyKind::Sharpness => (CID_SHARPNESS, None),
        PropertyKind::Gamma => (CID_GAMMA, None),
        PropertyKind::ColorEnable => (CID_COLOR_KILLER, None),
        PropertyKind::WhiteBalance => (
            CID_WHITE_BALANCE_TEMPERATURE,
            Some(AutoControl {
                id: CID_AUTO_WHITE_BALANCE,
                encoding: AutoEncoding::Boolean,
            }),
        ),
        PropertyKind::BacklightCompensation => (CID_BACKLIGHT_COMPENSATION, None),
        PropertyKind::Gain => (
            CID_GAIN,
            Some(AutoControl {
                id: CID_AUTOGAIN,
                encoding: AutoEncoding::Boolean,
            }),
        ),
    };
    Some(ControlIds { value, auto })
}

#[derive(Debug, Clone, Copy)]
struct ControlRange {
    minimum: i64,
    maximum: i64,
    step: i64,
    default: i64,
    disabled: bool,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Camera backend over a `/dev/videoN` device.
///
/// Delivery runs on a dedicated thread that opens its own device handle, so
/// property calls on the main handle never contend with streaming. Buffers
/// are negotiated as YUYV and handed to the sink as RGB at 24 bits per pixel.
pub struct V4l2Backend {
    index: u32,
    device: Device,
    info: DeviceInfo,
    /// Control domains from `query_controls`, keyed by control id.
    control_ranges: HashMap<u32, ControlRange>,
    fps_hint: Option<u32>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    worker: Option<Worker>,
}

impl V4l2Backend {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                CameraError::DeviceNotFound(index)
            } else {
                CameraError::DeviceOpenFailed(err.to_string())
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let info = DeviceInfo {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let mut control_ranges = HashMap::new();
        for description in device.query_controls().unwrap_or_default() {
            control_ranges.insert(
                description.id,
                ControlRange {
                    minimum: description.minimum,
                    maximum: description.maximum,
                    step: i64::try_from(description.step).unwrap_or(i64::MAX),
                    default: description.default,
                    disabled: description.flags.contains(ControlFlags::DISABLED),
                },
            );
        }

        Ok(Self {
            index,
            device,
            info,
            control_ranges,
            fps_hint: None,
            sink: Arc::new(Mutex::new(None)),
            worker: None,
        })
    }

    /// Ask the driver for `fps` during negotiation.
    ///
    /// What the driver grants is only a hint; rate enforcement stays with
    /// the session's throttle.
    #[must_use]
    pub fn with_fps_hint(mut self, fps: u32) -> Self {
        self.fps_hint = Some(fps);
        self
    }

    fn ids_for(property: PropertyKind) -> Result<ControlIds> {
        control_ids(property).ok_or(CameraError::PropertyUnavailable(property))
    }

    fn range_of(&self, id: u32) -> Option<ControlRange> {
        self.control_ranges
            .get(&id)
            .copied()
            .filter(|range| !range.disabled)
    }

    fn read_control(&self, id: u32) -> io::Result<i64> {
        match self.device.control(id)?.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported control payload",
            )),
        }
    }

    fn write_control(&self, id: u32, value: i64) -> io::Result<()> {
        self.device.set_control(Control {
            id,
            value: Value::Integer(value),
        })
    }

    fn read_auto(&self, auto: AutoControl) -> bool {
        let raw = match self.read_control(auto.id) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match auto.encoding {
            AutoEncoding::Boolean => raw != 0,
            AutoEncoding::ExposureMenu => raw != EXPOSURE_MANUAL,
        }
    }

    fn write_auto(&self, auto: AutoControl, enabled: bool) -> io::Result<()> {
        match auto.encoding {
            AutoEncoding::Boolean => self.device.set_control(Control {
                id: auto.id,
                value: Value::Boolean(enabled),
            }),
            AutoEncoding::ExposureMenu => self.write_control(
                auto.id,
                if enabled {
                    EXPOSURE_APERTURE_PRIORITY
                } else {
                    EXPOSURE_MANUAL
                },
            ),
        }
    }
}

impl CameraBackend for V4l2Backend {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self, format: &mut FrameFormat) -> Result<()> {
        if self.worker.is_some() {
            return Err(CameraError::StartFailed(
                "capture already running".to_owned(),
            ));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let sink = Arc::clone(&self.sink);
        let index = self.index;
        let fps_hint = self.fps_hint;
        let requested = *format;
        let (negotiated_tx, negotiated_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            capture_loop(
                index,
                requested,
                fps_hint,
                &thread_cancel,
                &sink,
                &negotiated_tx,
            );
        });

        match negotiated_rx.recv() {
            Ok(Ok(negotiated)) => {
                *format = negotiated;
                self.worker = Some(Worker { cancel, handle });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CameraError::StartFailed(
                    "capture thread exited during negotiation".to_owned(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Result<StopWaiter> {
        let Some(worker) = self.worker.take() else {
            return Ok(Box::new(|| Ok(())));
        };
        worker.cancel.store(true, Ordering::Relaxed);
        let sink = Arc::clone(&self.sink);
        Ok(Box::new(move || {
            let joined = worker
                .handle
                .join()
                .map_err(|_| CameraError::StreamError("capture thread panicked".to_owned()));
            // the thread is gone, so the sink can be released without waiting
            sink.lock().unwrap_or_else(PoisonError::into_inner).take();
            joined
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
        control_ids(property).is_some_and(|ids| self.range_of(ids.value).is_some())
    }

    fn property(
        &self,
        property: PropertyKind,
        representation: Representation,
    ) -> Result<(i32, bool)> {
        let ids = Self::ids_for(property)?;
        let raw = self.read_control(ids.value).map_err(|err| {
            log::debug!("reading {property} control failed: {err}");
            CameraError::PropertyUnavailable(property)
        })?;
        let auto = ids.auto.is_some_and(|auto| self.read_auto(auto));

        let magnitude = match representation {
            Representation::Absolute => clamp_control(raw),
            Representation::Percentage => self
                .property_range(property)?
                .device_percentage(clamp_control(raw)),
        };
        Ok((magnitude, auto))
    }

    fn set_property(
        &mut self,
        property: PropertyKind,
        value: i32,
        auto: bool,
        representation: Representation,
    ) -> Result<()> {
        let ids = Self::ids_for(property)?;
        let target = match representation {
            Representation::Absolute => {
                if let Ok(range) = self.property_range(property) {
                    if !range.contains(value) {
                        return Err(CameraError::ValueOutOfRange { property, value });
                    }
                }
                i64::from(value)
            }
            Representation::Percentage => {
                if !(0..=100).contains(&value) {
                    return Err(CameraError::ValueOutOfRange { property, value });
                }
                let range = self
                    .property_range(property)
                    .map_err(|_| CameraError::SetFailed(property))?;
                i64::from(range.device_value(value))
            }
        };

        if let Some(auto_control) = ids.auto {
            self.write_auto(auto_control, auto).map_err(|err| {
                log::debug!("switching {property} auto mode failed: {err}");
                CameraError::SetFailed(property)
            })?;
        } else if auto {
            log::debug!("{property} has no auto control, setting value only");
        }

        match self.write_control(ids.value, target) {
            Ok(()) => Ok(()),
            // drivers may refuse value writes while auto owns the control
            Err(err) if auto => {
                log::debug!("value write under auto ignored for {property}: {err}");
                Ok(())
            }
            Err(err) => {
                log::debug!("writing {property} control failed: {err}");
                Err(CameraError::SetFailed(property))
            }
        }
    }

    fn property_range(&self, property: PropertyKind) -> Result<PropertyRange> {
        let ids = Self::ids_for(property)?;
        let range = self
            .range_of(ids.value)
            .ok_or(CameraError::PropertyUnavailable(property))?;
        let auto_capable = ids.auto.is_some_and(|auto| self.range_of(auto.id).is_some());
        Ok(PropertyRange::new(
            clamp_control(range.minimum),
            clamp_control(range.maximum),
            clamp_control(range.step).max(1),
            clamp_control(range.default),
            auto_capable,
        ))
    }

    fn capture_sizes(&self) -> Result<Vec<CaptureSize>> {
        let framesizes = self
            .device
            .enum_framesizes(FourCC::new(b"YUYV"))
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let mut sizes = Vec::new();
        for framesize in framesizes {
            match framesize.size {
                FrameSizeEnum::Discrete(size) => sizes.push(CaptureSize {
                    width: size.width,
                    height: size.height,
                    color_depth: 24,
                }),
                FrameSizeEnum::Stepwise(stepwise) => {
                    for (width, height) in COMMON_SIZES {
                        if width >= stepwise.min_width
                            && width <= stepwise.max_width
                            && height >= stepwise.min_height
                            && height <= stepwise.max_height
                        {
                            sizes.push(CaptureSize {
                                width,
                                height,
                                color_depth: 24,
                            });
                        }
                    }
                }
            }
        }
        Ok(sizes)
    }

    fn show_properties_dialog(&mut self) -> Result<()> {
        Err(CameraError::DialogUnavailable)
    }
}

type Negotiation = std::result::Result<FrameFormat, CameraError>;

/// Body of the capture thread: negotiate, stream, convert, deliver.
fn capture_loop(
    index: u32,
    requested: FrameFormat,
    fps_hint: Option<u32>,
    cancel: &AtomicBool,
    sink: &Mutex<Option<FrameSink>>,
    negotiated_tx: &mpsc::Sender<Negotiation>,
) {
    let device = match Device::new(index as usize) {
        Ok(device) => device,
        Err(err) => {
            let _ = negotiated_tx.send(Err(CameraError::StartFailed(err.to_string())));
            return;
        }
    };

    let format = match negotiate(&device, requested, fps_hint) {
        Ok(format) => format,
        Err(err) => {
            let _ = negotiated_tx.send(Err(err));
            return;
        }
    };

    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = negotiated_tx.send(Err(CameraError::StartFailed(err.to_string())));
            return;
        }
    };

    let _ = negotiated_tx.send(Ok(format));
    let pixel_count = (format.width * format.height) as usize;

    while !cancel.load(Ordering::Relaxed) {
        let (buffer, _meta) = match stream.next() {
            Ok(delivery) => delivery,
            Err(err) => {
                if !cancel.load(Ordering::Relaxed) {
                    log::error!("streaming from /dev/video{index} failed: {err}");
                }
                break;
            }
        };

        let rgb = yuyv_to_rgb24(buffer, pixel_count);
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_mut() {
            sink(&rgb);
        }
    }
}

/// Request YUYV at the given geometry, adopting what the driver grants.
fn negotiate(device: &Device, requested: FrameFormat, fps_hint: Option<u32>) -> Negotiation {
    let yuyv = FourCC::new(b"YUYV");

    let mut fmt = device
        .format()
        .map_err(|err| CameraError::StartFailed(err.to_string()))?;
    fmt.width = requested.width;
    fmt.height = requested.height;
    fmt.fourcc = yuyv;

    let fmt = device
        .set_format(&fmt)
        .map_err(|err| CameraError::StartFailed(err.to_string()))?;
    if fmt.fourcc != yuyv {
        return Err(CameraError::StartFailed(format!(
            "device granted {} instead of YUYV",
            fmt.fourcc
        )));
    }

    if let Some(fps) = fps_hint {
        if let Err(err) = device.set_params(&Parameters::with_fps(fps)) {
            log::debug!("frame rate hint {fps} rejected: {err}");
        }
    }

    // buffers are converted to RGB on the way to the sink
    Ok(FrameFormat::new(fmt.width, fmt.height, 24))
}

fn clamp_control(value: i64) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    {
        value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}
