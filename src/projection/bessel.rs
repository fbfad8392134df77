/// Bessel function of the first kind, order 1, evaluated via the standard
/// Abramowitz & Stegun two-branch polynomial approximation (double precision
/// coefficients); the crate is double-precision throughout.
pub fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    let result = if ax < 8.0 {
        let y = x * x;
        let p1 = -184_9525.0_f64;
        let num = x
            * (72_362_614_232.0
                + y * (-7_895_059_235.0
                    + y * (242_396_853.1
                        + y * (-2_972_611.439 + y * (15_704.48260 + y * (-30.16036606))))));
        let den = 144_725_228_442.0
            + y * (2_300_535_178.0
                + y * (18_583_304.74
                    + y * (99_447.43394 + y * (376.9991397 + y))));
        let _ = p1;
        num / den
    } else {
        let y = 64.0 / (ax * ax);
        let xx = ax - 2.356194491;

        let p = 1.0
            + y * (0.183_105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * (-0.240337019e-6))));
        let q = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * 0.105787412e-6)));

        let sqrt_term = (0.636_619_772 / ax).sqrt();
        let amplitude = sqrt_term * (p * xx.cos() - (8.0 / ax) * q * xx.sin());
        if x < 0.0 {
            -amplitude
        } else {
            amplitude
        }
    };

    if ax < 8.0 && x < 0.0 {
        -result
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn j1_is_zero_at_origin() {
        assert_abs_diff_eq!(bessel_j1(0.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn j1_first_positive_peak_is_reasonable() {
        // J1 reaches its first maximum (~0.5819) near x = 1.8412.
        let v = bessel_j1(1.8412);
        assert!((v - 0.5819).abs() < 1e-3);
    }

    #[test]
    fn j1_is_odd() {
        let v = bessel_j1(3.0);
        let vneg = bessel_j1(-3.0);
        assert_abs_diff_eq!(v, -vneg, epsilon = 1e-9);
    }
}
