//! Single-entry imaging orchestrator: compose the gridder, FFT stage,
//! statistics, connected-component labelling, and Gaussian fitting into one
//! call that turns visibilities into an image and a source list.

use ndarray::Array2;
use num_complex::Complex64;

use crate::ccl::{label_islands, Connectivity, IslandParams};
use crate::config::{ImagingParams, KernelFunction};
use crate::error::ImagingError;
use crate::fft;
use crate::fit::{fit_gaussian_2d, FitOutcome, FitSample, Gaussian2D};
use crate::gridder::{convolve_to_grid, convolve_to_grid_wproj};
use crate::projection::{build_hankel_matrix, build_wproj_kernel_bank, primary_beam_image, HankelMatrix};
use crate::stats::sigma_clip_rms;

/// One measured visibility, with its (u, v, w) baseline coordinates in
/// wavelengths and an optional SNR weight.
#[derive(Clone, Copy, Debug)]
pub struct Visibility {
    pub vis: Complex64,
    pub u: f64,
    pub v: f64,
    pub w: f64,
    pub weight: Option<f64>,
}

/// Final output of `image_visibilities`: the dirty image, beam, pruned label
/// map (if requested), and the retained source islands (positive and
/// negative combined, as the data model specifies label ids are signed).
pub struct ImagingResult {
    pub image: Array2<f64>,
    pub beam: Array2<f64>,
    pub label_map: Option<Array2<i32>>,
    pub islands: Vec<IslandParams>,
}

/// Bucket visibilities into w-plane groups, per `pars.projection`. Returns
/// `(bucket_w_value, member_indices)` pairs.
fn bucket_by_wplane(vis: &[Visibility], num_wplanes: usize, median: bool) -> Vec<(f64, Vec<usize>)> {
    if num_wplanes == 0 {
        return vec![(0.0, (0..vis.len()).collect())];
    }

    let mut indices: Vec<usize> = (0..vis.len()).collect();
    indices.sort_by(|&a, &b| vis[a].w.partial_cmp(&vis[b].w).unwrap());

    let n = indices.len();
    let per_bucket = (n + num_wplanes - 1) / num_wplanes.max(1);
    let mut buckets = Vec::with_capacity(num_wplanes);

    for chunk in indices.chunks(per_bucket.max(1)) {
        if chunk.is_empty() {
            continue;
        }
        let ws: Vec<f64> = chunk.iter().map(|&i| vis[i].w).collect();
        let w_value = if median {
            let mut sorted = ws.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            sorted[sorted.len() / 2]
        } else {
            ws.iter().sum::<f64>() / ws.len() as f64
        };
        buckets.push((w_value, chunk.to_vec()));
    }

    buckets
}

/// Run the full imaging pipeline: grid, transform, correct, estimate
/// background, label sources, and (optionally) fit Gaussians.
pub fn image_visibilities(
    vis: &[Visibility],
    pars: &ImagingParams,
) -> Result<ImagingResult, ImagingError> {
    if pars.image_size % 4 != 0 {
        return Err(ImagingError::InvalidConfig(format!(
            "image_size must be a multiple of 4, got {}",
            pars.image_size
        )));
    }
    if pars.source_find.analysis_n_sigma > pars.source_find.detection_n_sigma {
        return Err(ImagingError::InvalidConfig(
            "analysis_n_sigma must be <= detection_n_sigma".into(),
        ));
    }

    tracing::info!(n_vis = vis.len(), image_size = pars.image_size, "gridding visibilities");

    let cell_size_rad = pars.cell_size * std::f64::consts::PI / (180.0 * 3600.0);
    let p = 1.0 / (cell_size_rad * pars.image_size as f64);

    let proj = &pars.projection;
    let use_wplanes = proj.num_wplanes > 0;
    let buckets = bucket_by_wplane(vis, proj.num_wplanes, proj.wplanes_median);

    if use_wplanes && proj.hankel_opt && proj.aproj_opt {
        return Err(ImagingError::InvalidConfig(
            "A-projection cannot be combined with the Hankel fast path".into(),
        ));
    }

    // W-kernel array size, in non-oversampled pixels; must be even.
    let wproj_array_size = {
        let s = proj.max_wpconv_support.max(2);
        if s % 2 == 0 { s } else { s + 1 }
    };
    let oversampled_n = wproj_array_size * pars.gridder.oversampling;

    let hankel_matrix: Option<HankelMatrix> =
        (use_wplanes && proj.hankel_opt).then(|| build_hankel_matrix(oversampled_n / 2));
    let aproj_beam = (use_wplanes && proj.aproj_opt)
        .then(|| primary_beam_image(oversampled_n, proj.obs_ra, proj.obs_dec, proj.aproj_mask_perc));

    let mut vis_grid = Array2::<Complex64>::zeros((pars.image_size, pars.image_size));
    let mut sampling_grid = Array2::<f64>::zeros((pars.image_size, pars.image_size));

    for (w_value, member_idx) in &buckets {
        let uv_pixels: Vec<(f64, f64)> = member_idx.iter().map(|&i| (vis[i].u / p, vis[i].v / p)).collect();
        let samples: Vec<Complex64> = member_idx.iter().map(|&i| vis[i].vis).collect();
        let weights: Option<Vec<f64>> = if vis.iter().any(|v| v.weight.is_some()) {
            Some(member_idx.iter().map(|&i| vis[i].weight.unwrap_or(1.0)).collect())
        } else {
            None
        };

        let gridded = if use_wplanes {
            let bank = build_wproj_kernel_bank(
                &pars.kernel_function,
                wproj_array_size,
                pars.gridder.oversampling,
                *w_value,
                proj.kernel_trunc_perc,
                proj.hankel_opt,
                hankel_matrix.as_ref(),
                proj.interp_type,
                aproj_beam.as_ref(),
            )?;
            convolve_to_grid_wproj(
                pars.image_size,
                &uv_pixels,
                &samples,
                weights.as_deref(),
                &pars.gridder,
                &bank,
                false,
            )?
        } else {
            convolve_to_grid(
                &pars.kernel_function,
                pars.image_size,
                &uv_pixels,
                &samples,
                weights.as_deref(),
                &pars.gridder,
                false,
            )?
        };

        vis_grid += &gridded.vis_grid;
        sampling_grid += &gridded.sampling_grid;
    }

    tracing::debug!("running FFT imaging stage");
    let fft_result = fft::image(
        &vis_grid,
        &sampling_grid,
        &pars.kernel_function,
        pars.gridder.support,
        pars.gridder.shift_to_fft,
        &pars.fft_routine,
        pars.padding_factor,
        pars.gridding_correction,
        pars.analytic_gcf,
    )?;

    tracing::debug!("estimating background and running source-find");
    let source_find_result = run_source_find(&fft_result.image, pars)?;

    Ok(ImagingResult {
        image: fft_result.image,
        beam: fft_result.beam,
        label_map: source_find_result.0,
        islands: source_find_result.1,
    })
}

fn run_source_find(
    image: &Array2<f64>,
    pars: &ImagingParams,
) -> Result<(Option<Array2<i32>>, Vec<IslandParams>), ImagingError> {
    let sf = &pars.source_find;

    let clip = sigma_clip_rms(image, 3.0, sf.sigma_clip_iters, sf.median_method)?;
    let rms = if sf.estimate_rms > 0.0 { sf.estimate_rms } else { clip.rms };

    let detection_threshold = sf.detection_n_sigma * rms;
    let analysis_threshold = sf.analysis_n_sigma * rms;
    let connectivity = if sf.ccl_4connectivity { Connectivity::Four } else { Connectivity::Eight };

    let (pos_map, mut pos_islands) = label_islands(
        image,
        analysis_threshold,
        detection_threshold,
        1,
        connectivity,
        sf.generate_labelmap,
    )?;

    let mut islands = Vec::new();
    let mut combined_map = if sf.generate_labelmap { Some(pos_map) } else { None };

    pos_islands.retain(|i| {
        let (min_r, max_r, min_c, max_c) = i.bounding_box;
        (max_r - min_r + 1) * (max_c - min_c + 1) >= sf.source_min_area
    });

    if sf.find_negative_sources {
        let (neg_map, mut neg_islands) = label_islands(
            image,
            analysis_threshold,
            detection_threshold,
            -1,
            connectivity,
            sf.generate_labelmap,
        )?;
        neg_islands.retain(|i| {
            let (min_r, max_r, min_c, max_c) = i.bounding_box;
            (max_r - min_r + 1) * (max_c - min_c + 1) >= sf.source_min_area
        });

        if let (Some(map), true) = (combined_map.as_mut(), sf.generate_labelmap) {
            for (dst, &src) in map.iter_mut().zip(neg_map.iter()) {
                if src != 0 {
                    *dst = -src;
                }
            }
        }

        for island in &mut neg_islands {
            island.label_idx = -island.label_idx;
        }
        islands.extend(neg_islands);
    }

    islands.append(&mut pos_islands);

    if sf.gaussian_fitting {
        for island in &mut islands {
            fit_island(island, image, combined_map.as_ref(), sf.ceres_diffmethod, sf.ceres_solvertype);
        }
    }

    Ok((combined_map, islands))
}

fn fit_island(
    island: &mut IslandParams,
    image: &Array2<f64>,
    label_map: Option<&Array2<i32>>,
    diff_method: crate::config::CeresDiffMethod,
    solver_type: crate::config::CeresSolverType,
) {
    let (min_r, max_r, min_c, max_c) = island.bounding_box;
    let mut samples = Vec::new();

    for row in min_r..=max_r {
        for col in min_c..=max_c {
            if let Some(map) = label_map {
                if map[[row, col]] != island.label_idx {
                    continue;
                }
            }
            samples.push(FitSample { x: col as f64, y: row as f64, value: image[[row, col]] });
        }
    }

    let area = ((max_r - min_r + 1) * (max_c - min_c + 1)) as f64;
    let sigma_guess = (island.extremum_val.abs() * area / (2.0 * std::f64::consts::PI * island.extremum_val.abs().max(crate::consts::EPSILON)))
        .sqrt()
        * 0.5;

    let guess = Gaussian2D {
        amplitude: island.extremum_val,
        x_mean: island.xbar,
        y_mean: island.ybar,
        x_stddev: sigma_guess.max(0.5),
        y_stddev: sigma_guess.max(0.5),
        theta: 0.0,
    };

    match fit_gaussian_2d(&samples, guess, diff_method, solver_type) {
        Ok(FitOutcome::Converged(fit)) => {
            island.fit = Some(fit);
            island.fit_diagnostic = None;
        }
        Ok(FitOutcome::Failed(msg)) => {
            island.fit = None;
            island.fit_diagnostic = Some(msg);
        }
        Err(e) => {
            island.fit = None;
            island.fit_diagnostic = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridderParams, SourceFindParams};

    #[test]
    fn rejects_image_size_not_multiple_of_four() {
        let pars = ImagingParams {
            image_size: 10,
            ..ImagingParams::default()
        };
        assert!(image_visibilities(&[], &pars).is_err());
    }

    #[test]
    fn rejects_analysis_above_detection() {
        let mut pars = ImagingParams::default();
        pars.source_find.analysis_n_sigma = 5.0;
        pars.source_find.detection_n_sigma = 3.0;
        assert!(image_visibilities(&[], &pars).is_err());
    }

    #[test]
    fn gaussian_fitting_populates_island_fit() {
        let truth = Gaussian2D {
            amplitude: 10.0,
            x_mean: 8.0,
            y_mean: 8.0,
            x_stddev: 2.0,
            y_stddev: 2.0,
            theta: 0.0,
        };
        let mut image = Array2::<f64>::zeros((16, 16));
        for row in 0..16 {
            for col in 0..16 {
                image[[row, col]] = truth.evaluate(col as f64, row as f64);
            }
        }
        let mut island = IslandParams {
            label_idx: 1,
            sign: 1,
            extremum_val: 10.0,
            extremum_y_idx: 8,
            extremum_x_idx: 8,
            ybar: 8.0,
            xbar: 8.0,
            bounding_box: (2, 14, 2, 14),
            fit: None,
            fit_diagnostic: None,
        };

        fit_island(
            &mut island,
            &image,
            None,
            crate::config::CeresDiffMethod::AutoDiff,
            crate::config::CeresSolverType::TrustRegionDenseQr,
        );

        let fit = island.fit.expect("expected a converged fit to be recorded on the island");
        assert!(island.fit_diagnostic.is_none());
        assert!((fit.x_mean - truth.x_mean).abs() < 0.5);
        assert!((fit.y_mean - truth.y_mean).abs() < 0.5);
    }

    #[test]
    fn wprojection_path_produces_finite_image() {
        let pars = ImagingParams {
            image_size: 16,
            kernel_function: KernelFunction::TopHat { half_base_width: 0.5 },
            gridder: GridderParams { kernel_exact: true, ..GridderParams::default() },
            projection: crate::config::ProjectionParams {
                num_wplanes: 2,
                max_wpconv_support: 4,
                ..crate::config::ProjectionParams::default()
            },
            source_find: SourceFindParams { find_negative_sources: false, ..SourceFindParams::default() },
            ..ImagingParams::default()
        };
        let vis = vec![
            Visibility { vis: Complex64::new(1.0, 0.0), u: 1.0, v: 0.0, w: 5.0, weight: None },
            Visibility { vis: Complex64::new(1.0, 0.0), u: -1.0, v: 1.0, w: 50.0, weight: None },
        ];
        let result = image_visibilities(&vis, &pars).unwrap();
        assert!(result.image.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn empty_visibility_set_produces_zero_image() {
        let pars = ImagingParams {
            image_size: 16,
            kernel_function: KernelFunction::TopHat { half_base_width: 0.5 },
            gridder: GridderParams { kernel_exact: true, ..GridderParams::default() },
            source_find: SourceFindParams { find_negative_sources: false, ..SourceFindParams::default() },
            ..ImagingParams::default()
        };
        let result = image_visibilities(&[], &pars).unwrap();
        assert_eq!(result.image.dim(), (16, 16));
    }
}
