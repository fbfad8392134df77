use crate::config::KernelFunction;
use crate::error::KernelError;

impl KernelFunction {
    /// Truncation radius, in pixels, beyond which the kernel is zero.
    pub fn truncation_radius(&self) -> f64 {
        match *self {
            KernelFunction::TopHat { half_base_width } => half_base_width,
            KernelFunction::Triangle { half_base_width, .. } => half_base_width,
            KernelFunction::Sinc { trunc, .. } => trunc,
            KernelFunction::Gaussian { trunc, .. } => trunc,
            KernelFunction::GaussianSinc { trunc, .. } => trunc,
            KernelFunction::PSWF { trunc } => trunc,
        }
    }

    /// Validate the kernel's parameters, returning the first violation found.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.truncation_radius() <= 0.0 {
            return Err(KernelError::InvalidParameter(
                "truncation radius must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Evaluate the kernel at radius `r`, in pixel units from the kernel centre.
    pub fn evaluate(&self, r: f64) -> f64 {
        match *self {
            KernelFunction::TopHat { half_base_width } => top_hat(r, half_base_width),
            KernelFunction::Triangle { half_base_width, value } => triangle(r, half_base_width, value),
            KernelFunction::Sinc { width_norm, trunc } => sinc_kernel(r, width_norm, trunc),
            KernelFunction::Gaussian { width_norm, trunc } => gaussian_kernel(r, width_norm, trunc),
            KernelFunction::GaussianSinc { width_norm_gaussian, width_norm_sinc, trunc } => {
                gaussian_kernel(r, width_norm_gaussian, trunc) * sinc_kernel(r, width_norm_sinc, trunc)
            }
            KernelFunction::PSWF { trunc } => pswf(r, trunc),
        }
    }
}

fn top_hat(r: f64, half_base_width: f64) -> f64 {
    if r.abs() < half_base_width {
        1.0
    } else {
        0.0
    }
}

fn triangle(r: f64, half_base_width: f64, value: f64) -> f64 {
    value * (1.0 - r.abs() / half_base_width).max(0.0)
}

fn sinc_kernel(r: f64, width_norm: f64, trunc: f64) -> f64 {
    if r.abs() > trunc {
        return 0.0;
    }
    let x = r / width_norm;
    if x.abs() < 1e-12 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

fn gaussian_kernel(r: f64, width_norm: f64, trunc: f64) -> f64 {
    if r.abs() > trunc {
        return 0.0;
    }
    (-(r / width_norm).powi(2)).exp()
}

/// Prolate spheroidal wave function approximation, matching the 6-term
/// rational approximation widely used for gridding anti-aliasing kernels
/// (m = 6, alpha = 1). Valid on the normalised interval [-1, 1].
fn pswf(r: f64, trunc: f64) -> f64 {
    if r.abs() > trunc {
        return 0.0;
    }
    let eta = if trunc > 0.0 { r / trunc } else { 0.0 };
    let eta2 = eta * eta;

    const P: [f64; 5] = [
        8.203343e-2,
        -3.644705e-1,
        6.278660e-1,
        -5.335581e-1,
        2.312756e-1,
    ];
    const Q: [f64; 2] = [1.0, 4.028559e-3];

    if eta2 > 1.0 {
        return 0.0;
    }

    let num = P[0] + eta2 * (P[1] + eta2 * (P[2] + eta2 * (P[3] + eta2 * P[4])));
    let den = Q[0] + eta2 * Q[1];
    (1.0 - eta2) * num / den
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_hat_is_symmetric_and_truncates() {
        let k = KernelFunction::TopHat { half_base_width: 0.5 };
        assert_eq!(k.evaluate(0.0), 1.0);
        assert_eq!(k.evaluate(0.49), 1.0);
        assert_eq!(k.evaluate(-0.49), 1.0);
        assert_eq!(k.evaluate(0.5), 0.0);
        assert_eq!(k.evaluate(1.0), 0.0);
    }

    #[test]
    fn triangle_peaks_at_centre() {
        let k = KernelFunction::Triangle { half_base_width: 2.0, value: 1.0 };
        assert_eq!(k.evaluate(0.0), 1.0);
        assert!((k.evaluate(1.0) - 0.5).abs() < 1e-12);
        assert_eq!(k.evaluate(2.0), 0.0);
    }

    #[test]
    fn sinc_is_one_at_origin() {
        let k = KernelFunction::Sinc { width_norm: 1.0, trunc: 5.0 };
        assert!((k.evaluate(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pswf_rejects_nonpositive_truncation() {
        let k = KernelFunction::PSWF { trunc: 0.0 };
        assert!(k.validate().is_err());
    }
}
