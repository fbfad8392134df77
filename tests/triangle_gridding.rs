//! End-to-end check: triangle-kernel gridding at a sub-pixel offset produces
//! a 5x5 block matching the normalised kernel evaluated at that offset.

use imaging_core::config::{GridderParams, KernelFunction};
use imaging_core::gridder::convolve_to_grid;
use imaging_core::kernel::build_kernel;
use num_complex::Complex64;

#[test]
fn triangle_block_matches_kernel_at_subpixel_offset() {
    let kernel_fn = KernelFunction::Triangle { half_base_width: 2.0, value: 1.0 };
    let params = GridderParams {
        support: 2,
        oversampling: 1,
        kernel_exact: true,
        normalise: true,
        shift_to_fft: false,
        halfplane: false,
    };

    let uv = vec![(1.1, -0.15)];
    let vis = vec![Complex64::new(1.0, 0.0)];

    let result = convolve_to_grid(&kernel_fn, 8, &uv, &vis, None, &params, false).unwrap();

    // Centre pixel is (N/2 + round(v), N/2 + round(u)) = (4 + 0, 4 + 1) = (4, 5).
    let expected_kernel = build_kernel(&kernel_fn, 2, -0.15, 0.1, 1, true).unwrap();

    for row_off in 0..5 {
        for col_off in 0..5 {
            let grid_row = 4 - 2 + row_off;
            let grid_col = 5 - 2 + col_off;
            let got = result.vis_grid[[grid_row, grid_col]].re;
            let want = expected_kernel[[row_off, col_off]];
            assert!(
                (got - want).abs() < 1e-9,
                "mismatch at ({grid_row},{grid_col}): got {got}, want {want}"
            );
        }
    }
}
