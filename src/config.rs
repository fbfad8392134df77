use serde::{Deserialize, Serialize};

/// One-dimensional anti-aliasing kernel family, selectable per imaging call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum KernelFunction {
    TopHat { half_base_width: f64 },
    Triangle { half_base_width: f64, value: f64 },
    Sinc { width_norm: f64, trunc: f64 },
    Gaussian { width_norm: f64, trunc: f64 },
    GaussianSinc { width_norm_gaussian: f64, width_norm_sinc: f64, trunc: f64 },
    PSWF { trunc: f64 },
}

/// Selects the FFT planning strategy for the imaging inverse transform.
///
/// `Wisdom`/`WisdomInplace` carry the path of a plan file that a native FFTW
/// binding would load; this crate's `rustfft` backend has no wisdom concept,
/// so both degrade to `Estimate` behaviour with a logged diagnostic (see
/// `fft::routine_plan`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum FftRoutine {
    #[default]
    Estimate,
    Measure,
    Patient,
    Wisdom(String),
    WisdomInplace(String),
}

/// Radial interpolation scheme used when reconstructing a 2D W-projection
/// kernel from its Hankel-transformed radial slice.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum InterpType {
    #[default]
    Linear,
    Cubic,
    Cosine,
}

/// Strategy used to estimate the median of an image for sigma-clipping.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum MedianMethod {
    /// Treat the median as exactly zero (cheapest, valid for zero-mean noise).
    ZeroMedian,
    /// Approximate median via iterative histogram bisection.
    BinMedian,
    /// Approximate median via a single-pass histogram (binapprox).
    #[default]
    BinApprox,
    /// Exact median via nth-element selection.
    NthElement,
}

/// Differentiation method used by the Gaussian-fitting solver.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum CeresDiffMethod {
    /// Finite-difference Jacobian, one residual block per pixel.
    AutoDiff,
    /// Finite-difference Jacobian, all pixels in a single residual block.
    #[default]
    AutoDiffSingleResBlk,
    /// Hand-derived analytic Jacobian, one residual block per pixel.
    AnalyticDiff,
    /// Hand-derived analytic Jacobian, all pixels in a single residual block.
    AnalyticDiffSingleResBlk,
}

/// Damping / step-selection schedule used by the Gaussian-fitting solver.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum CeresSolverType {
    /// Fixed-damping Gauss-Newton step (line-search BFGS analogue).
    #[default]
    LinearSearchBfgs,
    /// Fixed-damping Gauss-Newton step with limited-memory history (L-BFGS analogue).
    LinearSearchLbfgs,
    /// Full Levenberg-Marquardt trust-region damping schedule.
    TrustRegionDenseQr,
}

fn default_support() -> usize {
    3
}
fn default_oversampling() -> usize {
    9
}
fn default_kernel_trunc_perc() -> f64 {
    1.0
}
fn default_max_wpconv_support() -> usize {
    64
}
fn default_aproj_mask_perc() -> f64 {
    0.3
}

/// Parameters controlling kernel construction and gridding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridderParams {
    /// Half-width, in pixels, of the kernel's bounding box.
    #[serde(default = "default_support")]
    pub support: usize,
    /// Oversampling factor for the cached kernel bank (must be odd).
    #[serde(default = "default_oversampling")]
    pub oversampling: usize,
    /// Use the exact per-visibility kernel instead of the oversampled cache.
    #[serde(default)]
    pub kernel_exact: bool,
    /// Normalise each kernel so it sums to one.
    #[serde(default = "default_true")]
    pub normalise: bool,
    /// Pre-shift grid indices so a later fftshift is unnecessary.
    #[serde(default)]
    pub shift_to_fft: bool,
    /// Reflect v>0 samples to halve the number of gridded visibilities.
    #[serde(default)]
    pub halfplane: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GridderParams {
    fn default() -> Self {
        Self {
            support: default_support(),
            oversampling: default_oversampling(),
            kernel_exact: false,
            normalise: true,
            shift_to_fft: false,
            halfplane: false,
        }
    }
}

/// Parameters controlling W/A-projection kernel generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectionParams {
    /// Number of w-planes; 0 disables W-projection.
    #[serde(default)]
    pub num_wplanes: usize,
    /// Maximum support radius for a generated w-kernel.
    #[serde(default = "default_max_wpconv_support")]
    pub max_wpconv_support: usize,
    /// Fractional undersampling of the oversampled cache, 0 disables it.
    #[serde(default)]
    pub undersampling_opt: usize,
    /// Truncation threshold, percent of peak amplitude, in [0, 100).
    #[serde(default = "default_kernel_trunc_perc")]
    pub kernel_trunc_perc: f64,
    /// Use the Hankel-transform fast path instead of the direct 2D FFT.
    #[serde(default)]
    pub hankel_opt: bool,
    /// Radial interpolation scheme for the Hankel path.
    #[serde(default)]
    pub interp_type: InterpType,
    /// Bucket visibilities by median (true) or mean (false) w-value.
    #[serde(default)]
    pub wplanes_median: bool,
    /// Number of A-projection timesteps; 0 disables A-projection.
    #[serde(default)]
    pub num_timesteps: usize,
    /// Phase-centre declination, degrees.
    #[serde(default)]
    pub obs_dec: f64,
    /// Phase-centre right ascension, degrees.
    #[serde(default)]
    pub obs_ra: f64,
    /// Enable primary-beam (A-projection) correction.
    #[serde(default)]
    pub aproj_opt: bool,
    /// Primary-beam mask threshold, percent of peak.
    #[serde(default = "default_aproj_mask_perc")]
    pub aproj_mask_perc: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            num_wplanes: 0,
            max_wpconv_support: default_max_wpconv_support(),
            undersampling_opt: 0,
            kernel_trunc_perc: default_kernel_trunc_perc(),
            hankel_opt: false,
            interp_type: InterpType::default(),
            wplanes_median: false,
            num_timesteps: 0,
            obs_dec: 0.0,
            obs_ra: 0.0,
            aproj_opt: false,
            aproj_mask_perc: default_aproj_mask_perc(),
        }
    }
}

fn default_detection_n_sigma() -> f64 {
    4.0
}
fn default_analysis_n_sigma() -> f64 {
    3.0
}
fn default_sigma_clip_iters() -> usize {
    5
}
fn default_source_min_area() -> usize {
    1
}

/// Parameters controlling background estimation, labelling, and fitting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceFindParams {
    /// Detection threshold, multiple of RMS.
    #[serde(default = "default_detection_n_sigma")]
    pub detection_n_sigma: f64,
    /// Analysis threshold, multiple of RMS; must be <= detection_n_sigma.
    #[serde(default = "default_analysis_n_sigma")]
    pub analysis_n_sigma: f64,
    /// Pre-supplied RMS estimate; 0.0 means estimate it from the image.
    #[serde(default)]
    pub estimate_rms: f64,
    /// Also detect negative-signed sources.
    #[serde(default = "default_true")]
    pub find_negative_sources: bool,
    /// Sigma-clip iteration count for RMS/background estimation.
    #[serde(default = "default_sigma_clip_iters")]
    pub sigma_clip_iters: usize,
    /// Median estimation strategy.
    #[serde(default)]
    pub median_method: MedianMethod,
    /// Fit a 2D elliptical Gaussian to each retained island.
    #[serde(default)]
    pub gaussian_fitting: bool,
    /// Use 4-connectivity instead of 8-connectivity.
    #[serde(default)]
    pub ccl_4connectivity: bool,
    /// Emit a pruned label map alongside the island list.
    #[serde(default = "default_true")]
    pub generate_labelmap: bool,
    /// Minimum island area, in pixels, to retain during analysis.
    #[serde(default = "default_source_min_area")]
    pub source_min_area: usize,
    /// Differentiation method for Gaussian fitting.
    #[serde(default)]
    pub ceres_diffmethod: CeresDiffMethod,
    /// Solver damping schedule for Gaussian fitting.
    #[serde(default)]
    pub ceres_solvertype: CeresSolverType,
}

impl Default for SourceFindParams {
    fn default() -> Self {
        Self {
            detection_n_sigma: default_detection_n_sigma(),
            analysis_n_sigma: default_analysis_n_sigma(),
            estimate_rms: 0.0,
            find_negative_sources: true,
            sigma_clip_iters: default_sigma_clip_iters(),
            median_method: MedianMethod::default(),
            gaussian_fitting: false,
            ccl_4connectivity: false,
            generate_labelmap: true,
            source_min_area: default_source_min_area(),
            ceres_diffmethod: CeresDiffMethod::default(),
            ceres_solvertype: CeresSolverType::default(),
        }
    }
}

fn default_image_size() -> usize {
    1024
}
fn default_cell_size() -> f64 {
    1.0
}
fn default_padding_factor() -> f64 {
    1.0
}

/// Top-level parameters for one `image_visibilities` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImagingParams {
    /// Output image side length in pixels; must be a multiple of 4.
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    /// Pixel cell size, arcseconds.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// Output crop factor relative to the padded working grid; >= 1.0.
    #[serde(default = "default_padding_factor")]
    pub padding_factor: f64,
    /// Anti-aliasing kernel.
    pub kernel_function: KernelFunction,
    /// FFT planning strategy.
    #[serde(default)]
    pub fft_routine: FftRoutine,
    /// Divide the dirty image by the gridding correction function.
    #[serde(default = "default_true")]
    pub gridding_correction: bool,
    /// Use the closed-form image-domain kernel FT instead of a numerical IFFT.
    #[serde(default = "default_true")]
    pub analytic_gcf: bool,
    pub gridder: GridderParams,
    pub projection: ProjectionParams,
    pub source_find: SourceFindParams,
}

impl Default for ImagingParams {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            cell_size: default_cell_size(),
            padding_factor: default_padding_factor(),
            kernel_function: KernelFunction::TopHat { half_base_width: 0.5 },
            fft_routine: FftRoutine::default(),
            gridding_correction: true,
            analytic_gcf: true,
            gridder: GridderParams::default(),
            projection: ProjectionParams::default(),
            source_find: SourceFindParams::default(),
        }
    }
}
