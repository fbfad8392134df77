use thiserror::Error;

/// Errors from kernel function evaluation and kernel/cache construction.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("invalid kernel parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid kernel cache config: {0}")]
    InvalidConfig(String),
}

/// Errors from W/A-projection kernel generation.
#[derive(Error, Debug)]
pub enum ProjError {
    #[error("invalid projection config: {0}")]
    InvalidConfig(String),

    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),
}

/// Errors from the convolutional gridder.
#[derive(Error, Debug)]
pub enum GridderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Projection(#[from] ProjError),
}

/// Errors from the FFT imaging stage.
#[derive(Error, Debug)]
pub enum FftError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error loading or saving FFT wisdom: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from statistics and sigma-clip routines.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("numeric error: {0}")]
    Numeric(String),
}

/// Errors from connected-component labelling.
#[derive(Error, Debug)]
pub enum CclError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors from Gaussian fitting. Non-convergence is not an error — it is
/// recorded as a diagnostic string on the island; this enum covers only
/// malformed input to the fitter.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors from the top-level imaging orchestrator; a superset wrapping every
/// subsystem error so that `image_visibilities` has a single `Result` type.
#[derive(Error, Debug)]
pub enum ImagingError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Projection(#[from] ProjError),

    #[error(transparent)]
    Gridder(#[from] GridderError),

    #[error(transparent)]
    Fft(#[from] FftError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Ccl(#[from] CclError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
