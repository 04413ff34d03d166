//! Device control property model: kinds, values, ranges, capabilities.

use std::fmt;

/// Unit a property magnitude is expressed in.
///
/// The ordering (`Absolute < Percentage`) is part of the `PropertyValue`
/// total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Representation {
    /// Native device units, as reported by the driver.
    Absolute,
    /// 0..=100 of the property's range.
    Percentage,
}

/// Whether the device adjusts a property by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyMode {
    /// Device-controlled.
    Auto,
    /// Caller-controlled.
    Manual,
}

/// A controllable device property. Fixed, closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Horizontal camera rotation.
    Pan,
    /// Vertical camera rotation.
    Tilt,
    /// Rotation around the image axis.
    Roll,
    /// Optical or digital zoom.
    Zoom,
    /// Exposure time.
    Exposure,
    /// Aperture setting.
    Iris,
    /// Focus distance.
    Focus,
    /// Flash control.
    Flash,
    /// Black level of the image.
    Brightness,
    /// Luma contrast.
    Contrast,
    /// Color hue shift.
    Hue,
    /// Color saturation.
    Saturation,
    /// Edge enhancement.
    Sharpness,
    /// Gamma correction.
    Gamma,
    /// Color on/off switch.
    ColorEnable,
    /// White balance temperature.
    WhiteBalance,
    /// Backlight compensation.
    BacklightCompensation,
    /// Signal gain.
    Gain,
}

impl PropertyKind {
    /// Number of property kinds.
    pub const COUNT: usize = 18;

    /// Every property kind, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Pan,
        Self::Tilt,
        Self::Roll,
        Self::Zoom,
        Self::Exposure,
        Self::Iris,
        Self::Focus,
        Self::Flash,
        Self::Brightness,
        Self::Contrast,
        Self::Hue,
        Self::Saturation,
        Self::Sharpness,
        Self::Gamma,
        Self::ColorEnable,
        Self::WhiteBalance,
        Self::BacklightCompensation,
        Self::Gain,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pan => "Pan",
            Self::Tilt => "Tilt",
            Self::Roll => "Roll",
            Self::Zoom => "Zoom",
            Self::Exposure => "Exposure",
            Self::Iris => "Iris",
            Self::Focus => "Focus",
            Self::Flash => "Flash",
            Self::Brightness => "Brightness",
            Self::Contrast => "Contrast",
            Self::Hue => "Hue",
            Self::Saturation => "Saturation",
            Self::Sharpness => "Sharpness",
            Self::Gamma => "Gamma",
            Self::ColorEnable => "Color Enable",
            Self::WhiteBalance => "White Balance",
            Self::BacklightCompensation => "Backlight Compensation",
            Self::Gain => "Gain",
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A property reading or request: magnitude in one representation, plus mode.
///
/// Values compare structurally, ordered by representation, then magnitude,
/// then mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyValue {
    /// Unit of `magnitude`.
    pub representation: Representation,
    /// The magnitude in `representation` units.
    pub magnitude: i32,
    /// Auto or manual.
    pub mode: PropertyMode,
}

impl PropertyValue {
    /// Create a value in the given representation.
    #[must_use]
    pub const fn new(representation: Representation, magnitude: i32, mode: PropertyMode) -> Self {
        Self {
            representation,
            magnitude,
            mode,
        }
    }

    /// Create an absolute value.
    #[must_use]
    pub const fn absolute(magnitude: i32, mode: PropertyMode) -> Self {
        Self::new(Representation::Absolute, magnitude, mode)
    }

    /// Create a percentage value.
    #[must_use]
    pub const fn percentage(magnitude: i32, mode: PropertyMode) -> Self {
        Self::new(Representation::Percentage, magnitude, mode)
    }

    /// Whether the device controls this property itself.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self.mode, PropertyMode::Auto)
    }

    /// The same value with a different mode.
    #[must_use]
    pub const fn with_mode(self, mode: PropertyMode) -> Self {
        Self { mode, ..self }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.representation {
            Representation::Absolute => write!(f, "{}", self.magnitude)?,
            Representation::Percentage => write!(f, "{}%", self.magnitude)?,
        }
        if self.is_auto() {
            write!(f, " (auto)")?;
        }
        Ok(())
    }
}

/// The legal domain of a property.
///
/// Compares lexicographically by (minimum, maximum, step, default,
/// `auto_capable`). Invariant: `minimum <= maximum`, `step > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyRange {
    /// Smallest legal value.
    pub minimum: i32,
    /// Largest legal value.
    pub maximum: i32,
    /// Granularity of legal values.
    pub step: i32,
    /// Driver default.
    pub default: i32,
    /// Whether the device can adjust the property automatically.
    pub auto_capable: bool,
}

impl PropertyRange {
    /// Create a new range.
    #[must_use]
    pub const fn new(minimum: i32, maximum: i32, step: i32, default: i32, auto_capable: bool) -> Self {
        Self {
            minimum,
            maximum,
            step,
            default,
            auto_capable,
        }
    }

    /// `maximum - minimum`.
    #[must_use]
    pub const fn span(&self) -> i64 {
        self.maximum as i64 - self.minimum as i64
    }

    /// Count of distinct integer values in the range, inclusive.
    #[must_use]
    pub const fn domain_size(&self) -> i64 {
        self.span() + 1
    }

    /// Whether `value` lies within the range.
    #[must_use]
    pub const fn contains(&self, value: i32) -> bool {
        value >= self.minimum && value <= self.maximum
    }

    /// Convert a displayed percentage to absolute units (display switching
    /// only; round to nearest).
    #[must_use]
    pub fn absolute_from_percentage(&self, percentage: i32) -> i32 {
        let scaled = div_round(self.domain_size() * i64::from(percentage), 100);
        clamp_i32(scaled + i64::from(self.minimum))
    }

    /// Convert a displayed absolute value to a percentage (display switching
    /// only; round to nearest).
    #[must_use]
    pub fn percentage_from_absolute(&self, value: i32) -> i32 {
        let offset = i64::from(value) - i64::from(self.minimum);
        clamp_i32(div_round(offset * 100, self.domain_size()))
    }

    /// Device-side percentage of `value`, truncating.
    pub(crate) fn device_percentage(&self, value: i32) -> i32 {
        let offset = i64::from(value) - i64::from(self.minimum);
        clamp_i32(offset * 100 / self.domain_size())
    }

    /// Device-side absolute value for `percentage`, truncating.
    ///
    /// Scales by the span rather than the domain size so that 100% maps
    /// exactly to the maximum.
    pub(crate) fn device_value(&self, percentage: i32) -> i32 {
        let scaled = self.span() * i64::from(percentage) / 100;
        clamp_i32(scaled + i64::from(self.minimum))
    }
}

impl fmt::Display for PropertyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..={} step {} default {}",
            self.minimum, self.maximum, self.step, self.default
        )?;
        if self.auto_capable {
            write!(f, " (auto)")?;
        }
        Ok(())
    }
}

/// Per-property support flags, derived once from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyCapabilities {
    /// Reading the value succeeds.
    pub gettable: bool,
    /// Writing a value succeeds.
    pub settable: bool,
    /// The legal domain can be queried.
    pub range_queryable: bool,
}

impl PropertyCapabilities {
    /// Create a capability set.
    #[must_use]
    pub const fn new(gettable: bool, settable: bool, range_queryable: bool) -> Self {
        Self {
            gettable,
            settable,
            range_queryable,
        }
    }

    /// Whether value-control interaction should be offered at all.
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.gettable || self.settable || self.range_queryable
    }

    /// Whether the property can be both read and written.
    #[must_use]
    pub const fn fully_supported(&self) -> bool {
        self.gettable && self.settable
    }
}

/// Integer division rounding half away from zero. `d` must be positive.
fn div_round(n: i64, d: i64) -> i64 {
    if n >= 0 {
        (n + d / 2) / d
    } else {
        (n - d / 2) / d
    }
}

fn clamp_i32(value: i64) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    {
        value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}
