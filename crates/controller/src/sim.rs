//! Simulated raw source for hosts without an ADC or temperature probe.
//!
//! Each analog channel is a mean-reverting random walk with per-sample
//! electronic noise. Temperature walks around a room-ish value and
//! occasionally drops out (NaN), the way a DHT-class probe does when a read
//! times out.

use std::collections::HashMap;

use crate::sensors::RawSource;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Per-channel state
// ---------------------------------------------------------------------------

struct Walk {
    base: f64,
    center: f64,
}

const WALK_SIGMA_FRAC: f64 = 0.01;
const NOISE_SIGMA_FRAC: f64 = 0.004;
const MEAN_REVERSION: f64 = 0.03;

const TEMP_CENTER: f64 = 24.0;
const TEMP_WALK_SIGMA: f64 = 0.08;
const TEMP_MIN: f64 = -10.0;
const TEMP_MAX: f64 = 50.0;

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SimSource {
    full_scale: f64,
    channels: HashMap<u8, Walk>,
    temperature: f64,
    dropout_prob: f32,
}

impl SimSource {
    /// `full_scale_code` bounds every analog sample. `dropout_prob` is the
    /// chance that one temperature read fails.
    pub fn new(full_scale_code: u16, dropout_prob: f32) -> Self {
        Self {
            full_scale: full_scale_code as f64,
            channels: HashMap::new(),
            temperature: gaussian(TEMP_CENTER, 2.0),
            dropout_prob,
        }
    }

    fn walk(&mut self, channel: u8) -> &mut Walk {
        let full = self.full_scale;
        self.channels.entry(channel).or_insert_with(|| {
            // Spread channels so they don't all sit at mid-scale.
            let center = full * (0.3 + 0.4 * fastrand::f64());
            Walk {
                base: center,
                center,
            }
        })
    }
}

impl RawSource for SimSource {
    fn read_raw(&mut self, channel: u8) -> u16 {
        let full = self.full_scale;
        let walk = self.walk(channel);

        let pull = MEAN_REVERSION * (walk.center - walk.base);
        let step = gaussian(0.0, full * WALK_SIGMA_FRAC);
        walk.base = (walk.base + pull + step).clamp(0.0, full);

        let noise = gaussian(0.0, full * NOISE_SIGMA_FRAC);
        (walk.base + noise).round().clamp(0.0, full) as u16
    }

    fn read_temperature(&mut self) -> f32 {
        let pull = MEAN_REVERSION * (TEMP_CENTER - self.temperature);
        self.temperature =
            (self.temperature + pull + gaussian(0.0, TEMP_WALK_SIGMA)).clamp(TEMP_MIN, TEMP_MAX);

        if fastrand::f32() < self.dropout_prob {
            return f32::NAN;
        }
        self.temperature as f32
    }
}

// ===========================================================================
// Tests
// ===========================================================================
