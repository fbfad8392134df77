//! One-dimensional anti-aliasing kernel functions and the 2D kernel/cache
//! builder used by the gridder and the W/A-projection generator.

mod builder;
mod functions;

pub use builder::{build_kernel, oversampled_offset, populate_kernel_cache, KernelCache};
