//! Convolutional gridder: accumulates non-uniformly sampled visibilities onto
//! a regular complex vis-grid and a real sampling-grid.

use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::config::{GridderParams, KernelFunction};
use crate::consts::PARALLEL_VIS_THRESHOLD;
use crate::error::GridderError;
use crate::kernel::{build_kernel, oversampled_offset, populate_kernel_cache};
use crate::projection::WprojKernelBank;

/// Result of one gridding call: the complex vis-grid and its real
/// sampling-grid (gridded sum of kernel weights, used to derive the beam).
pub struct GriddedVis {
    pub vis_grid: Array2<Complex64>,
    pub sampling_grid: Array2<f64>,
}

struct PreparedVis {
    centre_y: isize,
    centre_x: isize,
    frac_y: f64,
    frac_x: f64,
    vis: Complex64,
}

/// Shared per-sample preparation: resolve halfplane reflection, the nearest
/// grid centre and fractional sub-pixel offset, the in-bounds test (evaluated
/// against the pre-shift centre, since `shift_to_fft` only relocates where a
/// sample is written, not whether it belongs on the grid at all), and the
/// optional fftshift-equivalent index relocation.
#[allow(clippy::too_many_arguments)]
fn prepare_visibilities(
    image_size: usize,
    uv_pixels: &[(f64, f64)],
    vis: &[Complex64],
    weights: Option<&[f64]>,
    support: usize,
    halfplane: bool,
    shift_to_fft: bool,
    allow_wraparound: bool,
) -> Result<Vec<PreparedVis>, GridderError> {
    if uv_pixels.len() != vis.len() {
        return Err(GridderError::InvalidInput(format!(
            "uv_pixels ({}) and vis ({}) length mismatch",
            uv_pixels.len(),
            vis.len()
        )));
    }
    if let Some(w) = weights {
        if w.len() != vis.len() {
            return Err(GridderError::InvalidInput(format!(
                "weights ({}) and vis ({}) length mismatch",
                w.len(),
                vis.len()
            )));
        }
    }

    let half = image_size as isize / 2;
    let mut prepared = Vec::with_capacity(uv_pixels.len());

    for (i, &(u, v)) in uv_pixels.iter().enumerate() {
        let w = weights.map(|w| w[i]).unwrap_or(1.0);
        if w == 0.0 {
            continue;
        }

        let (u, v, sample_vis) = if halfplane && v > 0.0 {
            (-u, -v, vis[i].conj() * w)
        } else {
            (u, v, vis[i] * w)
        };

        let u_round = u.round();
        let v_round = v.round();
        let frac_x = u - u_round;
        let frac_y = v - v_round;

        let pre_centre_x = u_round as isize + half;
        let pre_centre_y = v_round as isize + half;

        let in_bounds = pre_centre_x >= support as isize
            && pre_centre_x < image_size as isize - support as isize
            && pre_centre_y >= support as isize
            && pre_centre_y < image_size as isize - support as isize;

        if !in_bounds && !allow_wraparound {
            continue;
        }

        let (centre_x, centre_y) = if shift_to_fft {
            (
                (pre_centre_x + half).rem_euclid(image_size as isize),
                (pre_centre_y + half).rem_euclid(image_size as isize),
            )
        } else {
            (pre_centre_x, pre_centre_y)
        };

        prepared.push(PreparedVis {
            centre_y,
            centre_x,
            frac_y,
            frac_x,
            vis: sample_vis,
        });
    }

    Ok(prepared)
}

/// Grid a set of visibilities onto an `image_size`-square pair of grids using
/// the parametric anti-aliasing kernel directly (the plain, non-W-projection
/// path).
///
/// `uv_pixels` holds per-sample `(x, y)` pixel-plane coordinates (already
/// scaled by `1/(cell_size_rad * image_size)`
/// model); `vis`/`weights` are parallel per-sample arrays.
#[allow(clippy::too_many_arguments)]
pub fn convolve_to_grid(
    kernel_fn: &KernelFunction,
    image_size: usize,
    uv_pixels: &[(f64, f64)],
    vis: &[Complex64],
    weights: Option<&[f64]>,
    params: &GridderParams,
    allow_wraparound: bool,
) -> Result<GriddedVis, GridderError> {
    let support = params.support;
    let side = 2 * support + 1;

    kernel_fn.validate()?;

    let prepared = prepare_visibilities(
        image_size,
        uv_pixels,
        vis,
        weights,
        support,
        params.halfplane,
        params.shift_to_fft,
        allow_wraparound,
    )?;

    let cache = if params.kernel_exact {
        None
    } else {
        Some(populate_kernel_cache(
            kernel_fn,
            support,
            params.oversampling,
            params.normalise,
        )?)
    };

    let oversampling = params.oversampling;
    let normalise = params.normalise;
    let kernel_at = |sample: &PreparedVis| -> Array2<Complex64> {
        let real_kernel = match &cache {
            Some(cache) => {
                let off_y = oversampled_offset(sample.frac_y, oversampling).clamp(0, cache.oversampling as isize);
                let off_x = oversampled_offset(sample.frac_x, oversampling).clamp(0, cache.oversampling as isize);
                cache.get(off_y, off_x).clone()
            }
            None => build_kernel(kernel_fn, support, sample.frac_y, sample.frac_x, 1, normalise)
                .expect("kernel_fn validated above"),
        };
        real_kernel.mapv(|v| Complex64::new(v, 0.0))
    };

    let mut vis_grid = Array2::<Complex64>::zeros((image_size, image_size));
    let mut sampling_grid = Array2::<f64>::zeros((image_size, image_size));

    accumulate_by_column_modulo(
        &mut vis_grid,
        &mut sampling_grid,
        &prepared,
        support,
        side,
        image_size,
        allow_wraparound,
        &kernel_at,
    );

    Ok(GriddedVis { vis_grid, sampling_grid })
}

/// Grid a set of visibilities against a precomputed per-w-plane W-projection
/// (optionally A-projected) kernel bank instead of the plain parametric
/// kernel. The bank's oversampled complex array is sliced out at each
/// sample's sub-pixel offset with `extract_subkernel`, the same index
/// striding convention `kernel::builder` uses for its real-valued cache.
#[allow(clippy::too_many_arguments)]
pub fn convolve_to_grid_wproj(
    image_size: usize,
    uv_pixels: &[(f64, f64)],
    vis: &[Complex64],
    weights: Option<&[f64]>,
    params: &GridderParams,
    bank: &WprojKernelBank,
    allow_wraparound: bool,
) -> Result<GriddedVis, GridderError> {
    let support = bank.support;
    let side = 2 * support + 1;

    let prepared = prepare_visibilities(
        image_size,
        uv_pixels,
        vis,
        weights,
        support,
        params.halfplane,
        params.shift_to_fft,
        allow_wraparound,
    )?;

    let kernel_at = |sample: &PreparedVis| -> Array2<Complex64> {
        extract_subkernel(bank, support, sample.frac_y, sample.frac_x)
    };

    let mut vis_grid = Array2::<Complex64>::zeros((image_size, image_size));
    let mut sampling_grid = Array2::<f64>::zeros((image_size, image_size));

    accumulate_by_column_modulo(
        &mut vis_grid,
        &mut sampling_grid,
        &prepared,
        support,
        side,
        image_size,
        allow_wraparound,
        &kernel_at,
    );

    Ok(GriddedVis { vis_grid, sampling_grid })
}

/// Slice a `side`-square window out of a W-projection kernel bank's full
/// oversampled array, centred on the bank's own centre and strided by
/// `bank.oversampling` per pixel, offset by the sample's sub-pixel fraction.
fn extract_subkernel(bank: &WprojKernelBank, support: usize, frac_y: f64, frac_x: f64) -> Array2<Complex64> {
    let side = 2 * support + 1;
    let (n, _) = bank.kernel.dim();
    let centre = (n / 2) as isize;
    let oversampling = bank.oversampling as isize;

    let off_y = oversampled_offset(frac_y, bank.oversampling);
    let off_x = oversampled_offset(frac_x, bank.oversampling);

    let mut out = Array2::<Complex64>::zeros((side, side));
    for row in 0..side {
        let p = row as isize - support as isize;
        let src_row = (centre + off_y + p * oversampling).clamp(0, n as isize - 1) as usize;
        for col in 0..side {
            let q = col as isize - support as isize;
            let src_col = (centre + off_x + q * oversampling).clamp(0, n as isize - 1) as usize;
            out[[row, col]] = bank.kernel[[src_row, src_col]];
        }
    }
    out
}

/// Accumulate all prepared visibilities onto the shared grids, partitioned
/// by kernel-column index so that disjoint workers never write the same grid
/// column — this is the thread-race-avoidance scheme mandated for the
/// gridder: naive per-visibility parallelism would corrupt the shared grid.
/// `kernel_at` resolves the (possibly complex, possibly W-projection-derived)
/// kernel window for one prepared sample; both gridding paths share this
/// accumulation routine and differ only in how they answer that lookup.
fn accumulate_by_column_modulo(
    vis_grid: &mut Array2<Complex64>,
    sampling_grid: &mut Array2<f64>,
    prepared: &[PreparedVis],
    support: usize,
    side: usize,
    image_size: usize,
    allow_wraparound: bool,
    kernel_at: &(dyn Fn(&PreparedVis) -> Array2<Complex64> + Sync),
) {
    let columns: Vec<usize> = (0..side).collect();

    let per_column_updates: Vec<Vec<(usize, usize, Complex64, f64)>> = if prepared.len()
        >= PARALLEL_VIS_THRESHOLD
    {
        columns
            .par_iter()
            .map(|&c| column_updates(c, prepared, support, side, image_size, allow_wraparound, kernel_at))
            .collect()
    } else {
        columns
            .iter()
            .map(|&c| column_updates(c, prepared, support, side, image_size, allow_wraparound, kernel_at))
            .collect()
    };

    for updates in per_column_updates {
        for (row, col, dv, ds) in updates {
            vis_grid[[row, col]] += dv;
            sampling_grid[[row, col]] += ds;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn column_updates(
    kernel_col: usize,
    prepared: &[PreparedVis],
    support: usize,
    side: usize,
    image_size: usize,
    allow_wraparound: bool,
    kernel_at: &(dyn Fn(&PreparedVis) -> Array2<Complex64> + Sync),
) -> Vec<(usize, usize, Complex64, f64)> {
    let mut updates = Vec::new();

    for sample in prepared {
        let kernel = kernel_at(sample);

        for row_off in 0..side {
            let grid_row = sample.centre_y - support as isize + row_off as isize;
            for col_off in 0..side {
                if col_off != kernel_col {
                    continue;
                }
                let grid_col = sample.centre_x - support as isize + col_off as isize;

                let (gy, gx) = if allow_wraparound {
                    (
                        grid_row.rem_euclid(image_size as isize),
                        grid_col.rem_euclid(image_size as isize),
                    )
                } else {
                    if grid_row < 0
                        || grid_row >= image_size as isize
                        || grid_col < 0
                        || grid_col >= image_size as isize
                    {
                        continue;
                    }
                    (grid_row, grid_col)
                };

                let k = kernel[[row_off, col_off]];
                updates.push((gy as usize, gx as usize, sample.vis * k, k.re));
            }
        }
    }

    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn single_pixel_overlap_pillbox() {
        // Matches the reference fixture: N=8, support=1, TopHat(0.5),
        // uv=(-2,0), vis=42.123 -> single non-zero cell at (row=4, col=2).
        let kernel_fn = KernelFunction::TopHat { half_base_width: 0.5 };
        let params = GridderParams {
            support: 1,
            oversampling: 1,
            kernel_exact: true,
            normalise: false,
            shift_to_fft: false,
            halfplane: false,
        };
        let uv = vec![(-2.0, 0.0)];
        let vis = vec![Complex64::new(42.123, 0.0)];

        let result = convolve_to_grid(&kernel_fn, 8, &uv, &vis, None, &params, false).unwrap();

        for row in 0..8 {
            for col in 0..8 {
                let v = result.vis_grid[[row, col]];
                if row == 4 && col == 2 {
                    assert_abs_diff_eq!(v.re, 42.123, epsilon = 1e-9);
                    assert_abs_diff_eq!(result.sampling_grid[[row, col]], 1.0, epsilon = 1e-9);
                } else {
                    assert_abs_diff_eq!(v.re, 0.0, epsilon = 1e-9);
                    assert_abs_diff_eq!(v.im, 0.0, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn rejects_mismatched_input_lengths() {
        let kernel_fn = KernelFunction::TopHat { half_base_width: 0.5 };
        let params = GridderParams::default();
        let uv = vec![(0.0, 0.0), (1.0, 1.0)];
        let vis = vec![Complex64::new(1.0, 0.0)];
        assert!(convolve_to_grid(&kernel_fn, 8, &uv, &vis, None, &params, false).is_err());
    }

    #[test]
    fn gridded_flux_sum_matches_input_flux_sum() {
        let kernel_fn = KernelFunction::TopHat { half_base_width: 0.5 };
        let params = GridderParams {
            support: 1,
            oversampling: 1,
            kernel_exact: true,
            normalise: false,
            shift_to_fft: false,
            halfplane: false,
        };
        let uv = vec![(-2.0, 0.0), (1.0, 1.0), (0.0, -3.0)];
        let vis = vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(2.0, 0.0),
            Complex64::new(3.0, 0.0),
        ];
        let result = convolve_to_grid(&kernel_fn, 16, &uv, &vis, None, &params, false).unwrap();
        let sum: f64 = result.vis_grid.iter().map(|c| c.re).sum();
        assert_abs_diff_eq!(sum, 6.0, epsilon = 1e-9);
    }

    #[test]
    fn shift_to_fft_keeps_in_bounds_sample_whose_shifted_centre_wraps() {
        // N=8, support=1, half=4: a dead-centre sample's pre-shift centre is
        // (4,4), well within bounds. shift_to_fft relocates the *write*
        // position to (0,0); the sample itself must still be gridded, not
        // dropped because its post-shift position looks out of range.
        let kernel_fn = KernelFunction::TopHat { half_base_width: 0.5 };
        let params = GridderParams {
            support: 1,
            oversampling: 1,
            kernel_exact: true,
            normalise: false,
            shift_to_fft: true,
            halfplane: false,
        };
        let uv = vec![(0.0, 0.0)];
        let vis = vec![Complex64::new(7.0, 0.0)];

        let result = convolve_to_grid(&kernel_fn, 8, &uv, &vis, None, &params, false).unwrap();

        assert_abs_diff_eq!(result.vis_grid[[0, 0]].re, 7.0, epsilon = 1e-9);
        let total: f64 = result.vis_grid.iter().map(|c| c.re).sum();
        assert!(total > 0.0, "sample was dropped instead of gridded");
    }
}
