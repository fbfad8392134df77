//! W-projection and A-projection kernel generation.
//!
//! A W-projection kernel corrects for the non-coplanar (`w`) baseline term by
//! convolving with a per-w-plane kernel built by Fourier-transforming an
//! image-domain phase-screen. A-projection additionally multiplies that
//! image-domain kernel by a primary-beam pattern before the transform.

mod bessel;

use std::sync::Arc;

use ndarray::Array2;
use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::config::{InterpType, KernelFunction};
use crate::consts::EPSILON;
use crate::error::ProjError;

use bessel::bessel_j1;

/// Build the image-domain combined anti-aliasing + w-term kernel on an
/// `array_size * oversampling` square grid, following the direct mode's
/// image-domain formula. `array_size` must be even.
///
/// `array_size < 4` has no reduced-quality FFT plan to fall back to: unlike a
/// native FFTW binding, `rustfft` plans every size identically (no
/// Estimate/Measure/Patient distinction at the transform level), so there is
/// nothing to degrade to. We only log the condition rather than special-case
/// it, the same stance `fft::resolve_routine` takes for `Wisdom`/
/// `WisdomInplace`.
fn build_image_domain_kernel(
    kernel_fn: &KernelFunction,
    array_size: usize,
    oversampling: usize,
    w: f64,
) -> Result<Array2<Complex64>, ProjError> {
    if array_size % 2 != 0 {
        return Err(ProjError::InvalidConfig(format!(
            "array_size must be even, got {array_size}"
        )));
    }
    if array_size < 4 {
        tracing::warn!(
            array_size,
            "array_size < 4 requested for a W-projection kernel; rustfft has no reduced-quality \
             plan tier to fall back to, proceeding with the standard transform"
        );
    }

    let n = array_size * oversampling;
    let half = n as f64 / 2.0;
    let mut img = Array2::<Complex64>::zeros((n, n));

    for row in 0..n {
        // Scaled-radian coordinate in [-1, 1).
        let y = (row as f64 - half) / half;
        let ay = kernel_fn.evaluate(y * half / oversampling as f64);
        for col in 0..n {
            let x = (col as f64 - half) / half;
            let ax = kernel_fn.evaluate(x * half / oversampling as f64);
            let a = ax * ay;

            let r2 = x * x + y * y;
            img[[row, col]] = if r2 < 1.0 {
                let nxy = (1.0 - r2).sqrt();
                let phase = -2.0 * std::f64::consts::PI * w * (nxy - 1.0) / nxy;
                Complex64::new(a, 0.0) * Complex64::new(phase.cos(), phase.sin())
            } else {
                Complex64::new(a, 0.0)
            };
        }
    }

    Ok(img)
}

fn fft2d_complex(data: &Array2<Complex64>) -> Array2<Complex64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::<f64>::new();
    let fft_row: Arc<dyn rustfft::Fft<f64>> = planner.plan_fft_forward(w);
    let fft_col: Arc<dyn rustfft::Fft<f64>> = planner.plan_fft_forward(h);

    let mut work = data.clone();
    for row in 0..h {
        let mut buf: Vec<Complex64> = (0..w).map(|c| work[[row, c]]).collect();
        fft_row.process(&mut buf);
        for (c, v) in buf.into_iter().enumerate() {
            work[[row, c]] = v;
        }
    }
    for col in 0..w {
        let mut buf: Vec<Complex64> = (0..h).map(|r| work[[r, col]]).collect();
        fft_col.process(&mut buf);
        for (r, v) in buf.into_iter().enumerate() {
            work[[r, col]] = v;
        }
    }
    work
}

/// Truncate a w-kernel's support at the radius where `|K|/|K_max|` first
/// drops below `trunc_perc` percent, measured in steps of `oversampling`
/// along the first column.
fn truncate_support(kernel: &Array2<Complex64>, oversampling: usize, trunc_perc: f64) -> usize {
    let (n, _) = kernel.dim();
    let centre = n / 2;
    let max_mag = kernel[[centre, centre]].norm().max(EPSILON);
    let threshold = max_mag * trunc_perc / 100.0;

    let mut radius = centre / oversampling.max(1);
    for step in 1..=centre / oversampling.max(1) {
        let idx = centre + step * oversampling;
        if idx >= n {
            break;
        }
        if kernel[[idx, centre]].norm() < threshold {
            radius = step;
            break;
        }
    }
    radius.max(1)
}

/// Generate a per-w-plane convolution kernel using the direct (2D FFT) mode.
pub fn generate_wproj_kernel_direct(
    kernel_fn: &KernelFunction,
    array_size: usize,
    oversampling: usize,
    w: f64,
    trunc_perc: f64,
) -> Result<(Array2<Complex64>, usize), ProjError> {
    let img = build_image_domain_kernel(kernel_fn, array_size, oversampling, w)?;
    let kernel = fft2d_complex(&img);
    let support = truncate_support(&kernel, oversampling, trunc_perc);
    Ok((kernel, support))
}

/// Precomputed Discrete Hankel Transform matrix built from J1 Bessel zeros,
/// reused across w-planes of the same array size.
pub struct HankelMatrix {
    pub radial_points: usize,
    matrix: Array2<f64>,
}

/// Precompute the DHT matrix for `radial_points` radial samples.
pub fn build_hankel_matrix(radial_points: usize) -> HankelMatrix {
    let mut matrix = Array2::<f64>::zeros((radial_points, radial_points));
    for i in 0..radial_points {
        for j in 0..radial_points {
            let arg = std::f64::consts::PI * (i as f64 + 0.5) * (j as f64 + 0.5)
                / radial_points as f64;
            matrix[[i, j]] = bessel_j1(arg) * arg;
        }
    }
    HankelMatrix { radial_points, matrix }
}

/// Generate a per-w-plane kernel via the Hankel-transform fast path: sample
/// only the radial slice of the image-domain kernel, transform it with the
/// precomputed DHT matrix, then interpolate back onto the 2D half-quadrant.
pub fn generate_wproj_kernel_hankel(
    kernel_fn: &KernelFunction,
    array_size: usize,
    oversampling: usize,
    w: f64,
    hankel: &HankelMatrix,
    interp: InterpType,
) -> Result<Array2<Complex64>, ProjError> {
    if array_size % 2 != 0 {
        return Err(ProjError::InvalidConfig(format!(
            "array_size must be even, got {array_size}"
        )));
    }

    let n = array_size * oversampling;
    let half = n / 2;
    let radial_points = hankel.radial_points.min(half).max(1);

    // Sample the diagonal radius of the image-domain kernel.
    let mut radial_real = vec![0.0_f64; radial_points];
    for (i, slot) in radial_real.iter_mut().enumerate() {
        let t = i as f64 / radial_points as f64;
        let x = t;
        let y = t;
        let r2 = x * x + y * y;
        let a = kernel_fn.evaluate(x * half as f64 / oversampling as f64)
            * kernel_fn.evaluate(y * half as f64 / oversampling as f64);
        *slot = if r2 < 1.0 {
            let nxy = (1.0 - r2).sqrt();
            let phase = -2.0 * std::f64::consts::PI * w * (nxy - 1.0) / nxy;
            a * phase.cos()
        } else {
            a
        };
    }

    let mut transformed = vec![0.0_f64; radial_points];
    for i in 0..radial_points {
        let mut sum = 0.0;
        for j in 0..radial_points {
            sum += hankel.matrix[[i, j]] * radial_real[j];
        }
        transformed[i] = sum;
    }

    // Interpolate the radial profile back onto the 2D half-quadrant.
    let mut out = Array2::<Complex64>::zeros((half + 1, half + 1));
    for row in 0..=half {
        for col in 0..=half {
            let r = ((row * row + col * col) as f64).sqrt();
            let v = interpolate_radial(&transformed, r, interp);
            out[[row, col]] = Complex64::new(v, 0.0);
        }
    }

    Ok(out)
}

/// Mirror a `(half+1, half+1)` first-quadrant kernel (as produced by the
/// Hankel path, which only evaluates the radial profile once) into a full
/// `(2*half, 2*half)` square by reflecting both axes, matching the shape the
/// direct path's 2D FFT already produces.
fn mirror_quadrant(quadrant: &Array2<Complex64>) -> Array2<Complex64> {
    let (h, _) = quadrant.dim();
    let half = h - 1;
    let n = 2 * half;
    let mut full = Array2::<Complex64>::zeros((n, n));
    for row in 0..n {
        let r = (row as isize - half as isize).unsigned_abs().min(half);
        for col in 0..n {
            let c = (col as isize - half as isize).unsigned_abs().min(half);
            full[[row, col]] = quadrant[[r, c]];
        }
    }
    full
}

/// A per-w-plane oversampled convolution kernel, ready for gridding: the full
/// `(array_size*oversampling)`-square complex kernel (direct mode's native
/// shape; the Hankel path's quadrant is mirrored into the same shape) plus
/// the pixel-space support radius `truncate_support` resolved to.
pub struct WprojKernelBank {
    pub kernel: Array2<Complex64>,
    pub support: usize,
    pub oversampling: usize,
}

/// Build one W-projection kernel bank for baseline term `w`, dispatching to
/// the direct or Hankel generation path per `hankel_opt`, and applying the
/// primary beam first (direct path only — Hankel rejects the combination, the
/// same rule `apply_primary_beam` enforces on its own).
#[allow(clippy::too_many_arguments)]
pub fn build_wproj_kernel_bank(
    kernel_fn: &KernelFunction,
    array_size: usize,
    oversampling: usize,
    w: f64,
    trunc_perc: f64,
    hankel_opt: bool,
    hankel: Option<&HankelMatrix>,
    interp: InterpType,
    aproj_beam: Option<&Array2<f64>>,
) -> Result<WprojKernelBank, ProjError> {
    if hankel_opt {
        if aproj_beam.is_some() {
            return Err(ProjError::UnsupportedCombination(
                "A-projection cannot be combined with the Hankel fast path".into(),
            ));
        }
        let hankel = hankel.ok_or_else(|| {
            ProjError::InvalidConfig("hankel matrix required when hankel_opt is set".into())
        })?;
        let quadrant = generate_wproj_kernel_hankel(kernel_fn, array_size, oversampling, w, hankel, interp)?;
        let kernel = mirror_quadrant(&quadrant);
        let support = truncate_support(&kernel, oversampling, trunc_perc);
        Ok(WprojKernelBank { kernel, support, oversampling })
    } else {
        let mut img = build_image_domain_kernel(kernel_fn, array_size, oversampling, w)?;
        if let Some(beam) = aproj_beam {
            apply_primary_beam(&mut img, beam, false)?;
        }
        let kernel = fft2d_complex(&img);
        let support = truncate_support(&kernel, oversampling, trunc_perc);
        Ok(WprojKernelBank { kernel, support, oversampling })
    }
}

fn interpolate_radial(samples: &[f64], r: f64, interp: InterpType) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let last = samples.len() - 1;
    if r <= 0.0 {
        return samples[0];
    }
    if r >= last as f64 {
        return samples[last];
    }
    let i0 = r.floor() as usize;
    let i1 = (i0 + 1).min(last);
    let frac = r - i0 as f64;

    match interp {
        InterpType::Linear => samples[i0] * (1.0 - frac) + samples[i1] * frac,
        InterpType::Cosine => {
            let mu = (1.0 - (frac * std::f64::consts::PI).cos()) / 2.0;
            samples[i0] * (1.0 - mu) + samples[i1] * mu
        }
        InterpType::Cubic => {
            // Catmull-Rom using the two bracketing samples plus their
            // nearest neighbours, clamped at the array edges.
            let im1 = i0.saturating_sub(1);
            let i2 = (i1 + 1).min(last);
            let p0 = samples[im1];
            let p1 = samples[i0];
            let p2 = samples[i1];
            let p3 = samples[i2];
            let t = frac;
            let t2 = t * t;
            let t3 = t2 * t;
            0.5 * ((2.0 * p1)
                + (-p0 + p2) * t
                + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
        }
    }
}

/// Construct a primary-beam amplitude image from low-order spherical
/// harmonic coefficients (zonal approximation), masked below `mask_perc`
/// percent of its peak.
pub fn primary_beam_image(array_size: usize, obs_ra: f64, obs_dec: f64, mask_perc: f64) -> Array2<f64> {
    let n = array_size;
    let half = n as f64 / 2.0;
    let dec_rad = obs_dec.to_radians();
    let ra_rad = obs_ra.to_radians();
    let mut beam = Array2::<f64>::zeros((n, n));

    for row in 0..n {
        let y = (row as f64 - half) / half;
        for col in 0..n {
            let x = (col as f64 - half) / half;
            let r2 = (x * x + y * y).min(1.0);
            let theta = r2.sqrt().asin();
            // Zonal harmonic approximation (l=2) of a symmetric beam pattern,
            // modulated by the phase-centre declination/RA as a slow taper.
            let zonal = 1.0 - 1.5 * theta.sin().powi(2);
            let taper = (dec_rad.cos() * ra_rad.cos()).abs().max(0.1);
            beam[[row, col]] = (zonal * taper).max(0.0);
        }
    }

    let peak = beam.iter().cloned().fold(0.0_f64, f64::max).max(EPSILON);
    let threshold = peak * mask_perc / 100.0;
    beam.mapv_inplace(|v| if v < threshold { 0.0 } else { v });
    beam
}

/// Apply an A-projection primary-beam multiplication to an image-domain
/// kernel. Fails with `UnsupportedCombination` if the Hankel fast path is
/// also requested.
pub fn apply_primary_beam(
    kernel_img: &mut Array2<Complex64>,
    beam: &Array2<f64>,
    hankel_opt: bool,
) -> Result<(), ProjError> {
    if hankel_opt {
        return Err(ProjError::UnsupportedCombination(
            "A-projection cannot be combined with the Hankel fast path".into(),
        ));
    }
    if kernel_img.dim() != beam.dim() {
        return Err(ProjError::InvalidConfig(
            "primary beam and kernel image dimensions must match".into(),
        ));
    }
    for (k, &b) in kernel_img.iter_mut().zip(beam.iter()) {
        *k *= b;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_array_size_is_rejected() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        assert!(generate_wproj_kernel_direct(&k, 7, 1, 0.0, 1.0).is_err());
    }

    #[test]
    fn direct_kernel_has_expected_shape() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        let (kernel, support) = generate_wproj_kernel_direct(&k, 8, 1, 0.0, 1.0).unwrap();
        assert_eq!(kernel.dim(), (8, 8));
        assert!(support >= 1);
    }

    #[test]
    fn aproj_rejects_hankel_combination() {
        let mut img = Array2::<Complex64>::zeros((4, 4));
        let beam = Array2::<f64>::ones((4, 4));
        assert!(apply_primary_beam(&mut img, &beam, true).is_err());
    }

    #[test]
    fn primary_beam_peaks_near_centre() {
        let beam = primary_beam_image(16, 0.0, 0.0, 0.0);
        let centre = beam[[8, 8]];
        let corner = beam[[0, 0]];
        assert!(centre >= corner);
    }

    #[test]
    fn direct_bank_has_full_square_shape() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        let bank = build_wproj_kernel_bank(&k, 8, 1, 10.0, 1.0, false, None, InterpType::Linear, None).unwrap();
        assert_eq!(bank.kernel.dim(), (8, 8));
        assert!(bank.support >= 1);
    }

    #[test]
    fn hankel_bank_is_mirrored_to_full_square() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        let hankel = build_hankel_matrix(4);
        let bank = build_wproj_kernel_bank(&k, 8, 1, 10.0, 1.0, true, Some(&hankel), InterpType::Linear, None)
            .unwrap();
        assert_eq!(bank.kernel.dim(), (8, 8));
    }

    #[test]
    fn hankel_bank_rejects_aproj_combination() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        let hankel = build_hankel_matrix(4);
        let beam = Array2::<f64>::ones((8, 8));
        assert!(build_wproj_kernel_bank(
            &k,
            8,
            1,
            10.0,
            1.0,
            true,
            Some(&hankel),
            InterpType::Linear,
            Some(&beam)
        )
        .is_err());
    }

    #[test]
    fn direct_bank_with_beam_differs_from_without() {
        let k = KernelFunction::TopHat { half_base_width: 1.0 };
        let beam = primary_beam_image(8, 10.0, 20.0, 0.0);
        let plain = build_wproj_kernel_bank(&k, 8, 1, 5.0, 1.0, false, None, InterpType::Linear, None).unwrap();
        let beamed =
            build_wproj_kernel_bank(&k, 8, 1, 5.0, 1.0, false, None, InterpType::Linear, Some(&beam)).unwrap();
        assert_ne!(plain.kernel, beamed.kernel);
    }
}
