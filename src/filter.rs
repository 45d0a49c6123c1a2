//! Playback filter chain: high-pass, low-pass, gain.
//!
//! The high-pass strips DC offset and mains hum from synthesized speech, the
//! low-pass removes high-frequency artifacts left by resampling, and the gain
//! stage is the volume hook. Filter state persists across buffers so
//! consecutive buffers join without clicks; `reset` clears it after an
//! interruption.

use std::f32::consts::PI;

/// Tunable filter constants. The defaults were picked by ear and are not
/// assumed to be optimal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
    /// Resonance of both stages; 0.707 gives a flat Butterworth response.
    pub q: f32,
    pub gain: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            highpass_hz: 80.0,
            lowpass_hz: 7_500.0,
            q: std::f32::consts::FRAC_1_SQRT_2,
            gain: 1.0,
        }
    }
}

/// Second-order IIR section (RBJ cookbook coefficients, transposed direct form II).
#[derive(Debug, Clone)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
    bypass: bool,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    HighPass,
    LowPass,
}

impl Biquad {
    fn new(kind: Kind, cutoff_hz: f32, q: f32, sample_rate: u32) -> Self {
        let fs = sample_rate as f32;
        // A cutoff at or past Nyquist (or a nonsensical one) leaves the signal untouched
        if !(cutoff_hz > 0.0 && cutoff_hz < fs / 2.0 && q > 0.0) {
            return Self::passthrough();
        }

        let w0 = 2.0 * PI * cutoff_hz / fs;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match kind {
            Kind::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            Kind::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
            bypass: false,
        }
    }

    fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            bypass: true,
        }
    }

    #[inline]
    fn tick(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn process(&mut self, buf: &mut [f32]) {
        if self.bypass {
            return;
        }
        for s in buf.iter_mut() {
            *s = self.tick(*s);
        }
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// The fixed three-stage chain applied to every playback buffer.
#[derive(Debug, Clone)]
pub struct FilterChain {
    highpass: Biquad,
    lowpass: Biquad,
    gain: f32,
}

impl FilterChain {
    pub fn new(config: FilterConfig, sample_rate: u32) -> Self {
        Self {
            highpass: Biquad::new(Kind::HighPass, config.highpass_hz, config.q, sample_rate),
            lowpass: Biquad::new(Kind::LowPass, config.lowpass_hz, config.q, sample_rate),
            gain: config.gain,
        }
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        self.highpass.process(buf);
        self.lowpass.process(buf);
        if self.gain != 1.0 {
            for s in buf.iter_mut() {
                *s *= self.gain;
            }
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.max(0.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn reset(&mut self) {
        self.highpass.reset();
        self.lowpass.reset();
    }
}
