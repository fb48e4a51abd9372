// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use num_complex::Complex64;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

#[macro_export]
macro_rules! cmplx {
    () => {
        num_complex::Complex64::new(0.0, 0.0)
    };
    ($arg1:expr) => {
        num_complex::Complex64::new($arg1, 0.0)
    };
    ($arg1:expr, $arg2:expr) => {
        num_complex::Complex64::new($arg1, $arg2)
    };
}

/// Absolute-tolerance equality of two complex values: `|a - b| < tol`.
pub fn cequals(a: Complex64, b: Complex64, tol: f64) -> bool {
    (a - b).norm() < tol
}

/// Computes the infinity norm `max(abs(a))` of a complex vector.
pub fn norm_inf(a: &[Complex64]) -> f64 {
    a.iter().fold(0.0, |max, z| f64::max(max, z.norm()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cequals_uses_complex_distance() {
        let a = cmplx!(1.0, 1.0);
        assert!(cequals(a, cmplx!(1.0, 1.0 + 1e-12), 1e-10));
        assert!(!cequals(a, cmplx!(1.0 + 1e-4, 1.0), 1e-5));
        assert!(cequals(a * J, cmplx!(-1.0, 1.0), 1e-15));
    }

    #[test]
    fn norm_inf_of_empty_is_zero() {
        assert_eq!(norm_inf(&[]), 0.0);
        assert_eq!(norm_inf(&[cmplx!(3.0, 4.0), cmplx!(-1.0)]), 5.0);
    }
}
