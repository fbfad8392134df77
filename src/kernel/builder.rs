use ndarray::Array2;

use crate::config::KernelFunction;
use crate::error::KernelError;

/// Build a (2*support+1) square kernel for a visibility at sub-pixel offset
/// `(offset_y, offset_x)` in [-0.5, 0.5). When `oversampling == 1` this is the
/// exact per-visibility kernel; larger oversampling samples a finer grid
/// before subsampling back to the kernel's native resolution.
pub fn build_kernel(
    kernel_fn: &KernelFunction,
    support: usize,
    offset_y: f64,
    offset_x: f64,
    oversampling: usize,
    normalise: bool,
) -> Result<Array2<f64>, KernelError> {
    kernel_fn.validate()?;
    if oversampling == 0 {
        return Err(KernelError::InvalidConfig(
            "oversampling must be >= 1".into(),
        ));
    }

    let side = 2 * support + 1;
    let mut kernel = Array2::<f64>::zeros((side, side));

    for row in 0..side {
        let ry = (row as f64) - support as f64 - offset_y;
        let ky = kernel_fn.evaluate(ry);
        for col in 0..side {
            let rx = (col as f64) - support as f64 - offset_x;
            let kx = kernel_fn.evaluate(rx);
            kernel[[row, col]] = ky * kx;
        }
    }

    if normalise {
        normalise_in_place(&mut kernel)?;
    }

    Ok(kernel)
}

fn normalise_in_place(kernel: &mut Array2<f64>) -> Result<(), KernelError> {
    let sum: f64 = kernel.iter().sum();
    if sum.abs() < crate::consts::EPSILON {
        return Err(KernelError::InvalidConfig(
            "kernel sum is zero, cannot normalise".into(),
        ));
    }
    kernel.mapv_inplace(|v| v / sum);
    Ok(())
}

/// Round-half-away-from-zero offset of a fractional pixel coordinate into the
/// oversampled cache's index space. `f64::round` already rounds halves away
/// from zero, so no custom tie-break is needed here (banker's rounding must
/// NOT be used, per the kernel-cache spacing convention).
pub fn oversampled_offset(uv_frac: f64, oversampling: usize) -> isize {
    (uv_frac * oversampling as f64).round() as isize + (oversampling / 2) as isize
}

/// A cache of pre-built kernels, one per oversampled sub-pixel offset.
/// Indexed `[off_y, off_x]` with `off_y, off_x in 0..=oversampling`.
pub struct KernelCache {
    pub oversampling: usize,
    pub support: usize,
    kernels: Array2<Array2<f64>>,
}

impl KernelCache {
    pub fn get(&self, off_y: isize, off_x: isize) -> &Array2<f64> {
        &self.kernels[[off_y as usize, off_x as usize]]
    }
}

/// Precompute the full oversampled kernel cache for one kernel function and
/// support radius. `oversampling` must be a positive odd integer.
pub fn populate_kernel_cache(
    kernel_fn: &KernelFunction,
    support: usize,
    oversampling: usize,
    normalise: bool,
) -> Result<KernelCache, KernelError> {
    if oversampling == 0 || oversampling % 2 == 0 {
        return Err(KernelError::InvalidConfig(format!(
            "oversampling must be a positive odd integer, got {oversampling}"
        )));
    }

    let side = oversampling + 1;
    let mut kernels = Vec::with_capacity(side * side);

    for off_y in 0..side {
        let frac_y = (off_y as f64 - (oversampling / 2) as f64) / oversampling as f64;
        for off_x in 0..side {
            let frac_x = (off_x as f64 - (oversampling / 2) as f64) / oversampling as f64;
            kernels.push(build_kernel(kernel_fn, support, frac_y, frac_x, 1, normalise)?);
        }
    }

    let kernels = Array2::from_shape_vec((side, side), kernels)
        .expect("kernel cache shape matches element count by construction");

    Ok(KernelCache {
        oversampling,
        support,
        kernels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normalised_kernel_sums_to_one() {
        let k = KernelFunction::TopHat { half_base_width: 2.0 };
        let kernel = build_kernel(&k, 2, 0.0, 0.0, 1, true).unwrap();
        let sum: f64 = kernel.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn cache_requires_odd_oversampling() {
        let k = KernelFunction::TopHat { half_base_width: 2.0 };
        assert!(populate_kernel_cache(&k, 2, 4, true).is_err());
        assert!(populate_kernel_cache(&k, 2, 5, true).is_ok());
    }

    #[test]
    fn oversampled_offset_rounds_half_away_from_zero() {
        assert_eq!(oversampled_offset(0.1, 5), 3);
        assert_eq!(oversampled_offset(-0.1, 5), 2);
        assert_eq!(oversampled_offset(0.0, 5), 2);
    }

    #[test]
    fn cache_matches_exact_kernel_within_tolerance() {
        let k = KernelFunction::Gaussian { width_norm: 1.0, trunc: 3.0 };
        let support = 3;
        let oversampling = 5;
        let cache = populate_kernel_cache(&k, support, oversampling, true).unwrap();

        for &(dy, dx) in &[(0.1, 0.2), (-0.3, 0.15), (0.0, -0.4)] {
            let off_y = oversampled_offset(dy, oversampling);
            let off_x = oversampled_offset(dx, oversampling);
            let cached = cache.get(off_y, off_x);

            let frac_y = (off_y as f64 - (oversampling / 2) as f64) / oversampling as f64;
            let frac_x = (off_x as f64 - (oversampling / 2) as f64) / oversampling as f64;
            let exact = build_kernel(&k, support, frac_y, frac_x, 1, true).unwrap();

            for (a, b) in cached.iter().zip(exact.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
        }
    }
}
