//! FFT imaging stage: fftshift, inverse transform, gridding correction, crop.

use std::sync::{Arc, Mutex, OnceLock};

use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::FftPlanner;

/// Process-wide FFT plan registry. `FftPlanner` already memoises plans by
/// (size, direction) internally, so a single shared instance avoids
/// replanning the same transform size across repeated `image_visibilities`
/// calls; this is the "global registry keyed by (size, direction)" the
/// imaging pipeline's design notes call for, without a fabricated wisdom-file
/// dependency.
fn plan_registry() -> &'static Mutex<FftPlanner<f64>> {
    static REGISTRY: OnceLock<Mutex<FftPlanner<f64>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FftPlanner::new()))
}

use crate::config::{FftRoutine, KernelFunction};
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::FftError;
use crate::kernel::build_kernel;

/// Result of the FFT imaging stage: the real dirty image and its real beam
/// (PSF), both fftshifted, scaled, cropped, and optionally corrected.
pub struct ImageAndBeam {
    pub image: Array2<f64>,
    pub beam: Array2<f64>,
}

/// Swap quadrants of a square matrix in place (standard fftshift).
pub fn fftshift<T: Clone + Default>(data: &mut Array2<T>) {
    let (h, w) = data.dim();
    let hh = h / 2;
    let hw = w / 2;

    for row in 0..hh {
        for col in 0..w {
            let r2 = row + hh;
            let c2 = (col + hw) % w;
            let tmp = data[[row, col]].clone();
            data[[row, col]] = data[[r2, c2]].clone();
            data[[r2, c2]] = tmp;
        }
    }
}

/// Resolve an `FftRoutine` selection to a logged, best-effort plan choice.
/// `rustfft` has no wisdom-file concept, so `Wisdom`/`WisdomInplace` degrade
/// to `Estimate` with a diagnostic rather than failing, mirroring a soft
/// recovery from wisdom-load failure rather than hard-erroring.
fn resolve_routine(routine: &FftRoutine) {
    match routine {
        FftRoutine::Estimate | FftRoutine::Measure | FftRoutine::Patient => {}
        FftRoutine::Wisdom(path) => {
            tracing::warn!(
                path = %path,
                "wisdom plan files are not supported by the rustfft backend; falling back to Estimate"
            );
        }
        FftRoutine::WisdomInplace(path) => {
            tracing::warn!(
                path = %path,
                "wisdom-inplace plan files are not supported by the rustfft backend; falling back to Estimate"
            );
        }
    }
}

fn ifft2d(data: &Array2<Complex64>) -> Array2<Complex64> {
    let (h, w) = data.dim();
    let (ifft_row, ifft_col): (Arc<dyn rustfft::Fft<f64>>, Arc<dyn rustfft::Fft<f64>>) = {
        let mut planner = plan_registry().lock().expect("FFT plan registry poisoned");
        (planner.plan_fft_inverse(w), planner.plan_fft_inverse(h))
    };

    let mut work = data.clone();

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let cols: Vec<Vec<Complex64>> = (0..w)
            .into_par_iter()
            .map(|col| {
                let mut buf: Vec<Complex64> = (0..h).map(|r| work[[r, col]]).collect();
                ifft_col.process(&mut buf);
                buf
            })
            .collect();
        for (col, buf) in cols.into_iter().enumerate() {
            for (row, v) in buf.into_iter().enumerate() {
                work[[row, col]] = v;
            }
        }
        let rows: Vec<Vec<Complex64>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut buf: Vec<Complex64> = (0..w).map(|c| work[[row, c]]).collect();
                ifft_row.process(&mut buf);
                buf
            })
            .collect();
        for (row, buf) in rows.into_iter().enumerate() {
            for (col, v) in buf.into_iter().enumerate() {
                work[[row, col]] = v;
            }
        }
    } else {
        for col in 0..w {
            let mut buf: Vec<Complex64> = (0..h).map(|r| work[[r, col]]).collect();
            ifft_col.process(&mut buf);
            for (row, v) in buf.into_iter().enumerate() {
                work[[row, col]] = v;
            }
        }
        for row in 0..h {
            let mut buf: Vec<Complex64> = (0..w).map(|c| work[[row, c]]).collect();
            ifft_row.process(&mut buf);
            for (col, v) in buf.into_iter().enumerate() {
                work[[row, col]] = v;
            }
        }
    }

    work
}

/// Crop the centre `out_size`-square region of a padded square matrix.
fn crop_centre(data: &Array2<f64>, out_size: usize) -> Array2<f64> {
    let (n, _) = data.dim();
    if out_size >= n {
        return data.clone();
    }
    let start = (n - out_size) / 2;
    data.slice(ndarray::s![start..start + out_size, start..start + out_size])
        .to_owned()
}

/// Analytic image-domain gridding correction function for the supported
/// anti-aliasing kernels: the kernel evaluated at each pixel's distance from
/// the image centre, matching the kernel used at gridding time.
pub fn analytic_gcf(kernel_fn: &KernelFunction, size: usize) -> Array2<f64> {
    let half = size as f64 / 2.0;
    let mut gcf = Array2::<f64>::zeros((size, size));
    for row in 0..size {
        let y = row as f64 - half;
        for col in 0..size {
            let x = col as f64 - half;
            let r = (x * x + y * y).sqrt();
            gcf[[row, col]] = kernel_fn.evaluate(r).max(0.0);
        }
    }
    gcf
}

/// Numerical gridding correction function: the inverse FFT of the
/// oversampled kernel evaluated over the whole image, used when
/// `analytic_gcf=false`.
pub fn numerical_gcf(
    kernel_fn: &KernelFunction,
    support: usize,
    size: usize,
) -> Result<Array2<f64>, FftError> {
    let kernel = build_kernel(kernel_fn, support, 0.0, 0.0, 1, true)
        .map_err(|e| FftError::InvalidInput(e.to_string()))?;
    let side = 2 * support + 1;

    let mut padded = Array2::<Complex64>::zeros((size, size));
    let offset = size / 2 - support;
    for row in 0..side {
        for col in 0..side {
            padded[[offset + row, offset + col]] = Complex64::new(kernel[[row, col]], 0.0);
        }
    }

    let transformed = ifft2d(&padded);
    let scale = 1.0 / (size * size) as f64;
    let mut out = Array2::<f64>::zeros((size, size));
    for (dst, src) in out.iter_mut().zip(transformed.iter()) {
        *dst = (src.re * scale).abs();
    }
    Ok(out)
}

/// Run the imaging FFT stage: optional fftshift, inverse FFT, shift, scale,
/// crop, and optional gridding correction — on both the vis-grid (producing
/// the dirty image) and the sampling-grid (producing the beam).
#[allow(clippy::too_many_arguments)]
pub fn image(
    vis_grid: &Array2<Complex64>,
    sampling_grid: &Array2<f64>,
    kernel_fn: &KernelFunction,
    support: usize,
    already_shifted: bool,
    routine: &FftRoutine,
    padding_factor: f64,
    gridding_correction: bool,
    analytic: bool,
) -> Result<ImageAndBeam, FftError> {
    let (n, n2) = vis_grid.dim();
    if n != n2 {
        return Err(FftError::InvalidInput("vis_grid must be square".into()));
    }

    resolve_routine(routine);

    let mut g = vis_grid.clone();
    if !already_shifted {
        fftshift(&mut g);
    }
    let mut ifft_image = ifft2d(&g);
    fftshift(&mut ifft_image);

    let mut sampling_complex = sampling_grid.mapv(|v| Complex64::new(v, 0.0));
    if !already_shifted {
        fftshift(&mut sampling_complex);
    }
    let mut ifft_beam = ifft2d(&sampling_complex);
    fftshift(&mut ifft_beam);

    let scale = 1.0 / (n * n) as f64;
    let mut image: Array2<f64> = ifft_image.mapv(|c| c.re * scale);
    let mut beam: Array2<f64> = ifft_beam.mapv(|c| c.re * scale);

    let out_size = ((n as f64) / padding_factor).round() as usize;
    if out_size < n {
        image = crop_centre(&image, out_size);
        beam = crop_centre(&beam, out_size);
    }

    if gridding_correction {
        let gcf = if analytic {
            analytic_gcf(kernel_fn, image.dim().0)
        } else {
            numerical_gcf(kernel_fn, support, image.dim().0)?
        };
        for (v, g) in image.iter_mut().zip(gcf.iter()) {
            *v /= g.max(crate::consts::EPSILON);
        }
    }

    Ok(ImageAndBeam { image, beam })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fftshift_swaps_quadrants() {
        let mut data = Array2::<f64>::zeros((4, 4));
        data[[0, 0]] = 1.0;
        fftshift(&mut data);
        assert_abs_diff_eq!(data[[2, 2]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[[0, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn fftshift_is_its_own_inverse_for_even_size() {
        let mut data = Array2::<f64>::zeros((6, 6));
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as f64;
        }
        let original = data.clone();
        fftshift(&mut data);
        fftshift(&mut data);
        for (a, b) in data.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_baseline_equals_sum_of_image_intensity() {
        // A constant vis-grid (zero baseline only) should inverse-FFT to a
        // single-pixel image whose value equals the original DC term once
        // scaled by 1/(N*N) and summed in real space — approximate check on
        // total energy conservation.
        let n = 8;
        let mut g = Array2::<Complex64>::zeros((n, n));
        g[[0, 0]] = Complex64::new(64.0, 0.0);
        let s = Array2::<f64>::zeros((n, n));
        let kernel_fn = KernelFunction::TopHat { half_base_width: 0.5 };
        let result = image(&g, &s, &kernel_fn, 1, true, &FftRoutine::Estimate, 1.0, false, true)
            .unwrap();
        let sum: f64 = result.image.iter().sum();
        assert_abs_diff_eq!(sum, 64.0, epsilon = 1e-6);
    }
}
