//! Webcam-capture binary for exercising a camera end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{LevelFilter, Log, Metadata, Record};
use webcam_capture::{Camera, CaptureConfig, PropertyKind, Representation, V4l2Backend};

/// Plain stderr logger for the demo binary.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// This can only be called once per process. Subsequent calls are silently
/// ignored.
fn init_logger() {
    static LOGGER: StderrLogger = StderrLogger;

    let max_level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level);
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> webcam_capture::Result<()> {
    init_logger();

    let index = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let backend = V4l2Backend::open(index)?.with_fps_hint(30);
    let camera = Camera::new(backend, CaptureConfig::default().with_fps_limit(15));

    let info = camera.device_info();
    println!("Device: {}", info.card);
    println!("Driver: {}", info.driver);

    match camera.capture_sizes() {
        Ok(sizes) => {
            let listed: Vec<String> = sizes
                .iter()
                .map(|size| format!("{}x{}", size.width, size.height))
                .collect();
            println!("Sizes:  {}", listed.join(", "));
        }
        Err(err) => println!("Sizes:  unavailable ({err})"),
    }

    println!("Properties:");
    for kind in PropertyKind::ALL {
        if !camera.property_capabilities(kind).is_supported() {
            continue;
        }
        let value = camera
            .property(kind, Representation::Percentage)
            .map_or_else(|_| "N/A".to_owned(), |value| value.to_string());
        println!(
            "  {:<22} {:<14} {}",
            kind.label(),
            value,
            camera.range_text(kind)
        );
    }

    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    camera.subscribe(move |frame, fps| {
        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 10 == 0 {
            let image = frame.image();
            let (width, height) = (image.width(), image.height());
            println!("frame {}: {width}x{height} at {fps:.1} fps", frame.id());
        }
    });

    camera.start()?;
    thread::sleep(Duration::from_secs(3));
    camera.stop()?;

    println!("Delivered {} frames", delivered.load(Ordering::Relaxed));
    if let Some(image) = camera.latest_frame() {
        println!("Last frame: {}x{}", image.width(), image.height());
    }
    Ok(())
}
