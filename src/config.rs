use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::error::Error;
use crate::math::Vector2D;

/// Period used when `reload_time` is 0.
pub const DEFAULT_RELOAD_PERIOD: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default = "Configuration::default_outputs")]
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub images: Vec<ImageWidgetConfig>,
}

impl Configuration {
    fn default_outputs() -> Vec<OutputConfig> {
        vec![OutputConfig::default()]
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(!self.outputs.is_empty(), "at least one output must be configured");
        for output in &self.outputs {
            ensure!(
                output.width > 0 && output.height > 0,
                "output {} must have a positive size",
                output.name
            );
        }
        for (idx, image) in self.images.iter().enumerate() {
            image
                .validate()
                .with_context(|| format!("images[{idx}] is invalid"))?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: "headless-1".into(),
            width: 1920,
            height: 1080,
        }
    }
}

impl OutputConfig {
    pub fn viewport(&self) -> Vector2D {
        Vector2D::new(f64::from(self.width), f64::from(self.height))
    }
}

/// Typed properties of one `image` widget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageWidgetConfig {
    /// Edge of the square the image is scaled to cover, in pixels.
    pub size: i64,
    /// Corner radius; -1 rounds to a circle/pill.
    pub rounding: i64,
    pub border_size: i64,
    pub border_color: Gradient,
    pub position: LayoutValue,
    pub halign: HAlign,
    pub valign: VAlign,
    /// Rotation in degrees, counter-clockwise.
    pub rotate: f64,
    pub path: String,
    /// -1 disables reloading, 0 reloads hourly, >0 is the period in seconds.
    pub reload_time: i64,
    /// Shell command whose stdout names the image to show.
    pub reload_cmd: String,
    pub onclick: String,
    /// Output the widget is placed on; empty places it on every output.
    pub monitor: String,
}

impl Default for ImageWidgetConfig {
    fn default() -> Self {
        Self {
            size: 150,
            rounding: -1,
            border_size: 4,
            border_color: Gradient::solid([0xdd, 0xdd, 0xdd, 0x88]),
            position: LayoutValue::default(),
            halign: HAlign::Center,
            valign: VAlign::Center,
            rotate: 0.0,
            path: String::new(),
            reload_time: -1,
            reload_cmd: String::new(),
            onclick: String::new(),
            monitor: String::new(),
        }
    }
}

impl ImageWidgetConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.path.trim().is_empty() {
            return Err(Error::config("path must not be empty"));
        }
        if self.size <= 0 || self.size > i64::from(u16::MAX) {
            return Err(Error::config(format!("size {} is out of range", self.size)));
        }
        if self.rounding < -1 || self.rounding > i64::from(i32::MAX) {
            return Err(Error::config(format!("rounding {} must be >= -1", self.rounding)));
        }
        if self.border_size < 0 || self.border_size > i64::from(u16::MAX) {
            return Err(Error::config(format!(
                "border_size {} is out of range",
                self.border_size
            )));
        }
        if !self.rotate.is_finite() {
            return Err(Error::config("rotate must be a finite number of degrees"));
        }
        ReloadPolicy::from_seconds(self.reload_time)?;
        Ok(())
    }

    pub fn reload_policy(&self) -> Result<ReloadPolicy, Error> {
        ReloadPolicy::from_seconds(self.reload_time)
    }

    pub fn applies_to(&self, output: &str) -> bool {
        self.monitor.is_empty() || self.monitor == output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPolicy {
    Disabled,
    Every(Duration),
}

impl ReloadPolicy {
    pub fn from_seconds(seconds: i64) -> Result<Self, Error> {
        match seconds {
            -1 => Ok(Self::Disabled),
            0 => Ok(Self::Every(DEFAULT_RELOAD_PERIOD)),
            s if s > 0 => Ok(Self::Every(Duration::from_secs(s as u64))),
            s => Err(Error::config(format!("reload_time {s} must be >= -1"))),
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Every(_))
    }

    pub fn period(self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Every(period) => Some(period),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Left,
    Center,
    Right,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    Center,
    Bottom,
    None,
}

/// Linear gradient of RGBA stops, e.g. `rgba(33ccffee) rgba(00ff99ee) 45deg`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Gradient {
    pub colors: Vec<[u8; 4]>,
    pub angle_deg: f64,
}

impl Gradient {
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            colors: vec![color],
            angle_deg: 0.0,
        }
    }

    /// Color at `t` in `[0, 1]` along the gradient axis.
    pub fn sample(&self, t: f64) -> [u8; 4] {
        match self.colors.as_slice() {
            [] => [0, 0, 0, 0],
            [only] => *only,
            colors => {
                let scaled = t.clamp(0.0, 1.0) * (colors.len() - 1) as f64;
                let idx = (scaled.floor() as usize).min(colors.len() - 2);
                let frac = scaled - idx as f64;
                let (a, b) = (colors[idx], colors[idx + 1]);
                std::array::from_fn(|c| {
                    (f64::from(a[c]) + (f64::from(b[c]) - f64::from(a[c])) * frac).round() as u8
                })
            }
        }
    }
}

impl FromStr for Gradient {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut colors = Vec::new();
        let mut angle_deg = 0.0;
        for token in s.split_whitespace() {
            if let Some(deg) = token.strip_suffix("deg") {
                angle_deg = deg
                    .parse()
                    .map_err(|_| format!("invalid gradient angle {token:?}"))?;
            } else {
                colors.push(parse_color(token)?);
            }
        }
        if colors.is_empty() {
            return Err(format!("gradient {s:?} has no colors"));
        }
        Ok(Self { colors, angle_deg })
    }
}

impl TryFrom<String> for Gradient {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn parse_color(token: &str) -> Result<[u8; 4], String> {
    let hex = |digits: &str| {
        u32::from_str_radix(digits, 16).map_err(|_| format!("invalid color {token:?}"))
    };
    if let Some(inner) = token.strip_prefix("rgba(").and_then(|t| t.strip_suffix(')')) {
        if inner.len() == 8 {
            let v = hex(inner)?;
            return Ok([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]);
        }
    } else if let Some(inner) = token.strip_prefix("rgb(").and_then(|t| t.strip_suffix(')')) {
        if inner.len() == 6 {
            let v = hex(inner)?;
            return Ok([(v >> 16) as u8, (v >> 8) as u8, v as u8, 0xff]);
        }
    } else if let Some(inner) = token.strip_prefix("0x") {
        if inner.len() == 8 {
            let v = hex(inner)?;
            return Ok([(v >> 16) as u8, (v >> 8) as u8, v as u8, (v >> 24) as u8]);
        }
    }
    Err(format!("invalid color {token:?}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayoutCoord {
    pub value: f64,
    pub percent: bool,
}

impl LayoutCoord {
    fn absolute(self, extent: f64) -> f64 {
        if self.percent {
            self.value / 100.0 * extent
        } else {
            self.value
        }
    }
}

/// Widget offset such as `"0, 80"` or `"-5%, 10%"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct LayoutValue {
    pub x: LayoutCoord,
    pub y: LayoutCoord,
}

impl LayoutValue {
    pub fn absolute(&self, viewport: Vector2D) -> Vector2D {
        Vector2D::new(self.x.absolute(viewport.x), self.y.absolute(viewport.y))
    }
}

impl FromStr for LayoutValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coord = |raw: &str| -> Result<LayoutCoord, String> {
            let raw = raw.trim();
            let (number, percent) = match raw.strip_suffix('%') {
                Some(n) => (n, true),
                None => (raw.strip_suffix("px").unwrap_or(raw), false),
            };
            let value = number
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid layout coordinate {raw:?}"))?;
            Ok(LayoutCoord { value, percent })
        };
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("layout value {s:?} must be \"x, y\""))?;
        Ok(Self {
            x: coord(x)?,
            y: coord(y)?,
        })
    }
}

impl TryFrom<String> for LayoutValue {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LayoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |c: LayoutCoord| {
            if c.percent {
                format!("{}%", c.value)
            } else {
                format!("{}", c.value)
            }
        };
        write!(f, "{}, {}", part(self.x), part(self.y))
    }
}
