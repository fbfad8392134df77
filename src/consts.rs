/// Minimum pixel count (N*N) to switch statistics and FFT passes to Rayon.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum visibility count to switch gridder accumulation to Rayon.
pub const PARALLEL_VIS_THRESHOLD: usize = 4_096;

/// Small epsilon guarding divisions (gridding correction, stddev checks).
pub const EPSILON: f64 = 1e-10;

/// Default number of sigma-clip iterations for RMS estimation.
pub const DEFAULT_SIGMA_CLIP_ITERS: usize = 5;

/// Default clipping width in standard deviations.
pub const DEFAULT_SIGMA_CLIP_SIGMA: f64 = 3.0;

/// Histogram bin count used by the binapprox/binmedian median strategies.
pub const MEDIAN_HISTOGRAM_BINS: usize = 1024;

/// Floating-point tolerance used by the invariants in module tests.
pub const FPTOLERANCE: f64 = 1.0e-10;
