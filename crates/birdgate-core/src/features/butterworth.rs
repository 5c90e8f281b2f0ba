//! Butterworth band-pass filter design, expressed as cascaded second-order
//! sections.
//!
//! Mirrors `scipy.signal.butter(4, [low, high], btype="band", output="sos")`:
//! a 4th-order Butterworth lowpass prototype is transformed to an analog
//! bandpass (which doubles the order to 8) and then mapped to the digital
//! domain with the bilinear transform, producing 4 second-order sections.
//! Derived here by hand because the corpus has no such design routine, only
//! the RBJ single-section cookbook in [`super::biquad`].

use super::biquad::Biquad;

/// Order passed to the analog lowpass prototype, matching the `order=4`
/// scipy is called with upstream. The resulting bandpass filter has order
/// `2 * PROTOTYPE_ORDER` and is realized as `PROTOTYPE_ORDER` SOS sections.
const PROTOTYPE_ORDER: usize = 4;

/// Minimal complex number, sufficient for pole/zero arithmetic at filter
/// design time. Filter design runs once per window reconfiguration, not
/// per-sample, so f64 and a hand-rolled type are fine here.
#[derive(Debug, Clone, Copy)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn add(self, o: Complex) -> Complex {
        Complex::new(self.re + o.re, self.im + o.im)
    }

    fn sub(self, o: Complex) -> Complex {
        Complex::new(self.re - o.re, self.im - o.im)
    }

    fn mul(self, o: Complex) -> Complex {
        Complex::new(
            self.re * o.re - self.im * o.im,
            self.re * o.im + self.im * o.re,
        )
    }

    fn scale(self, k: f64) -> Complex {
        Complex::new(self.re * k, self.im * k)
    }

    fn div(self, o: Complex) -> Complex {
        let denom = o.re * o.re + o.im * o.im;
        Complex::new(
            (self.re * o.re + self.im * o.im) / denom,
            (self.im * o.re - self.re * o.im) / denom,
        )
    }

    fn norm_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Principal square root, branch cut on the negative real axis.
    fn sqrt(self) -> Complex {
        let r = self.norm_sqr().sqrt();
        let re = ((r + self.re) / 2.0).max(0.0).sqrt();
        let mut im = ((r - self.re) / 2.0).max(0.0).sqrt();
        if self.im < 0.0 {
            im = -im;
        }
        Complex::new(re, im)
    }
}

/// Bilinear transform, sample period normalized to 1 (fs = 2): z = (2+s)/(2-s).
fn bilinear(s: Complex) -> Complex {
    Complex::new(2.0, 0.0).add(s).div(Complex::new(2.0, 0.0).sub(s))
}

/// Builds the SOS section for one analog bandpass pole, assuming its
/// conjugate partner forms the rest of the pair (true for every pole this
/// module produces, since the prototype poles come in conjugate pairs).
fn section_from_pole(pole: Complex, gain: f64) -> Biquad {
    let z = bilinear(pole);
    let a1 = -2.0 * z.re;
    let a2 = z.norm_sqr();
    // Zeros at z = 1 (DC) and z = -1 (Nyquist): (1 - z^-1)(1 + z^-1) = 1 - z^-2.
    Biquad::new(gain as f32, 0.0, -gain as f32, a1 as f32, a2 as f32)
}

/// Designs a Butterworth bandpass as `PROTOTYPE_ORDER` SOS sections.
///
/// `low_normalized` and `high_normalized` are the band edges as a fraction
/// of the Nyquist frequency, already clamped to `(0, 1)` by the caller.
pub fn bandpass_sos(low_normalized: f64, high_normalized: f64) -> Vec<Biquad> {
    let warp = |w: f64| 2.0 * (std::f64::consts::PI * w / 2.0).tan();
    let omega_low = warp(low_normalized);
    let omega_high = warp(high_normalized);
    let center = (omega_low * omega_high).sqrt();
    let bandwidth = omega_high - omega_low;
    let half_bw = bandwidth / 2.0;

    // Butterworth lowpass prototype poles (cutoff 1 rad/s, left-half-plane).
    // Keep only the upper-half-plane representative of each conjugate pair:
    // its conjugate contributes the mirrored SOS for free.
    let representatives: Vec<Complex> = (1..=PROTOTYPE_ORDER)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k - 1) as f64 / (2.0 * PROTOTYPE_ORDER as f64)
                + std::f64::consts::PI / 2.0;
            Complex::new(theta.cos(), theta.sin())
        })
        .filter(|p| p.im > 0.0)
        .collect();

    // Lowpass-to-bandpass: each prototype pole yields two bandpass poles
    // (the "plus" and "minus" branches of the transform).
    let mut branch_pairs = Vec::with_capacity(representatives.len());
    let mut gain_den = 1.0_f64;
    for p in &representatives {
        let scaled = p.scale(half_bw);
        let discriminant = scaled.mul(scaled).sub(Complex::new(center * center, 0.0));
        let root = discriminant.sqrt();
        let plus = scaled.add(root);
        let minus = scaled.sub(root);
        // Each representative stands in for itself and its conjugate, so
        // its plus/minus poles each contribute |2-pole|^2 to the gain
        // denominator rather than a single complex factor.
        gain_den *= Complex::new(2.0, 0.0).sub(plus).norm_sqr();
        gain_den *= Complex::new(2.0, 0.0).sub(minus).norm_sqr();
        branch_pairs.push((plus, minus));
    }

    let analog_gain = bandwidth.powi(PROTOTYPE_ORDER as i32);
    let gain_num = 2.0_f64.powi(PROTOTYPE_ORDER as i32); // (2 - 0) per analog zero at origin
    let total_gain = (analog_gain * gain_num / gain_den).abs();
    let section_gain = total_gain.powf(1.0 / PROTOTYPE_ORDER as f64);

    let mut sections = Vec::with_capacity(PROTOTYPE_ORDER);
    for (plus, minus) in branch_pairs {
        sections.push(section_from_pole(plus, section_gain));
        sections.push(section_from_pole(minus, section_gain));
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_four_sections() {
        let sections = bandpass_sos(2000.0 / 24_000.0, 9000.0 / 24_000.0);
        assert_eq!(sections.len(), 4);
    }

    #[test]
    fn band_edges_give_finite_stable_sections() {
        let sections = bandpass_sos(2000.0 / 24_000.0, 9000.0 / 24_000.0);
        for s in &sections {
            let mut s = *s;
            let mut out = s.process(1.0);
            for _ in 0..2000 {
                out = s.process(0.0);
            }
            assert!(out.is_finite());
            assert!(out.abs() < 10.0);
        }
    }

    #[test]
    fn passes_energy_inside_the_band_more_than_far_outside() {
        let sample_rate = 48_000.0_f64;

        let rms_at = |freq: f64| -> f64 {
            let mut sections = bandpass_sos(2000.0 / 24_000.0, 9000.0 / 24_000.0);
            let n = 4800;
            let mut acc = 0.0_f64;
            for i in 0..n {
                let t = i as f64 / sample_rate;
                let mut sample = (2.0 * std::f64::consts::PI * freq * t).sin() as f32;
                for s in sections.iter_mut() {
                    sample = s.process(sample);
                }
                acc += (sample as f64) * (sample as f64);
            }
            (acc / n as f64).sqrt()
        };

        let in_band = rms_at(5000.0);
        let out_of_band = rms_at(50.0);
        assert!(in_band > out_of_band * 2.0);
    }
}
