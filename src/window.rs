//! Intensity conditioning applied before edge weights are computed.
//!
//! A window (center, width) maps raw scanner values, e.g. Hounsfield units, to the 0..255 display
//! range. Values below the window saturate to 0 and values above to 255.
use crate::arrays::{Array3D, Volume};

const WINDOW_MIN: f64 = 0.0;
const WINDOW_MAX: f64 = 255.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub center: f64,
    pub width: f64,
}

impl Window {
    pub fn new(center: f64, width: f64) -> Self {
        Self { center, width }
    }

    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        let lower = self.center - 0.5 - (self.width - 1.0) / 2.0;
        let upper = self.center - 0.5 + (self.width - 1.0) / 2.0;
        if raw <= lower {
            WINDOW_MIN
        } else if raw > upper {
            WINDOW_MAX
        } else {
            ((raw - (self.center - 0.5)) / (self.width - 1.0) + 0.5) * (WINDOW_MAX - WINDOW_MIN)
                + WINDOW_MIN
        }
    }
}

fn normalize_channel(channel: &Array3D<f64>) -> Array3D<f64> {
    let (min, max) = channel
        .data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let ptp = max - min;
    if ptp.is_nan() || ptp <= 0.0 {
        return channel.map(|_| 0.0);
    }
    channel.map(|v| (v - min) / ptp)
}

impl Volume {
    pub fn windowed(&self, window: &Window) -> Volume {
        Volume {
            channels: self
                .channels
                .iter()
                .map(|c| c.map(|v| window.apply(*v)))
                .collect(),
            spacing: self.spacing,
        }
    }

    /// Rescales every channel to `[0, 1]`. A constant channel becomes all zeros.
    pub fn normalized(&self) -> Volume {
        Volume {
            channels: self.channels.iter().map(normalize_channel).collect(),
            spacing: self.spacing,
        }
    }
}
