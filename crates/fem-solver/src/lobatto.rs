//! Lobatto shape-function kernels.
//!
//! The H1 bases are built from the Lobatto shape functions l0..l11, their
//! kernel functions phi0..phi9 and Legendre polynomials up to degree 11.
//! The identities used here:
//!
//!   l0(x) = (1 - x)/2,  l1(x) = (1 + x)/2
//!   l_n(x) = (P_n(x) - P_{n-2}(x)) / sqrt(2 (2n - 1)),       n >= 2
//!   l_n(x) = phi_{n-2}(x) * (1 - x^2)/4,                      n >= 2
//!   l_n'(x) = sqrt((2n - 1)/2) P_{n-1}(x),                    n >= 2
//!   phi_k(x) = -4/((k+1)(k+2)) * sqrt((2k+3)/2) * P'_{k+1}(x)
//!
//! Legendre values and derivatives come from the three-term recurrences, so
//! all derivatives are closed-form.

/// Highest kernel function phi_k
pub const MAX_KERNEL: usize = 9;
/// Highest Legendre degree
pub const MAX_LEGENDRE: usize = 11;
/// Highest Lobatto shape function l_n
pub const MAX_LOBATTO: usize = 11;

/// Legendre polynomial P_n(x)
pub fn legendre(n: usize, x: f64) -> f64 {
    debug_assert!(n <= MAX_LEGENDRE);
    let (mut p0, mut p1) = (1.0, x);
    if n == 0 {
        return p0;
    }
    for k in 1..n {
        let p2 = ((2 * k + 1) as f64 * x * p1 - k as f64 * p0) / (k + 1) as f64;
        p0 = p1;
        p1 = p2;
    }
    p1
}

/// First derivative P_n'(x)
pub fn legendre_dx(n: usize, x: f64) -> f64 {
    debug_assert!(n <= MAX_LEGENDRE + 1);
    // P'_{k+1} = P'_{k-1} + (2k+1) P_k
    let (mut p0, mut p1) = (1.0, x);
    let (mut d0, mut d1) = (0.0, 1.0);
    if n == 0 {
        return d0;
    }
    for k in 1..n {
        let p2 = ((2 * k + 1) as f64 * x * p1 - k as f64 * p0) / (k + 1) as f64;
        let d2 = d0 + (2 * k + 1) as f64 * p1;
        p0 = p1;
        p1 = p2;
        d0 = d1;
        d1 = d2;
    }
    d1
}

/// Second derivative P_n''(x)
pub fn legendre_dxx(n: usize, x: f64) -> f64 {
    // P''_{k+1} = P''_{k-1} + (2k+1) P'_k
    let (mut p0, mut p1) = (1.0, x);
    let (mut d0, mut d1) = (0.0, 1.0);
    let (mut s0, mut s1) = (0.0, 0.0);
    if n <= 1 {
        return 0.0;
    }
    for k in 1..n {
        let p2 = ((2 * k + 1) as f64 * x * p1 - k as f64 * p0) / (k + 1) as f64;
        let d2 = d0 + (2 * k + 1) as f64 * p1;
        let s2 = s0 + (2 * k + 1) as f64 * d1;
        p0 = p1;
        p1 = p2;
        d0 = d1;
        d1 = d2;
        s0 = s1;
        s1 = s2;
    }
    s1
}

/// Lobatto shape function l_n(x)
pub fn lobatto(n: usize, x: f64) -> f64 {
    debug_assert!(n <= MAX_LOBATTO);
    match n {
        0 => (1.0 - x) * 0.5,
        1 => (1.0 + x) * 0.5,
        _ => (legendre(n, x) - legendre(n - 2, x)) / (2.0 * (2 * n - 1) as f64).sqrt(),
    }
}

/// First derivative l_n'(x)
pub fn lobatto_dx(n: usize, x: f64) -> f64 {
    debug_assert!(n <= MAX_LOBATTO);
    match n {
        0 => -0.5,
        1 => 0.5,
        _ => ((2 * n - 1) as f64 / 2.0).sqrt() * legendre(n - 1, x),
    }
}

/// Second derivative l_n''(x)
pub fn lobatto_dxx(n: usize, x: f64) -> f64 {
    debug_assert!(n <= MAX_LOBATTO);
    match n {
        0 | 1 => 0.0,
        _ => ((2 * n - 1) as f64 / 2.0).sqrt() * legendre_dx(n - 1, x),
    }
}

/// Kernel function phi_k(x), defined by l_{k+2}(x) = phi_k(x) (1 - x^2)/4
pub fn phi(k: usize, x: f64) -> f64 {
    debug_assert!(k <= MAX_KERNEL);
    let n = (k + 2) as f64;
    -4.0 / ((n - 1.0) * n) * ((2.0 * n - 1.0) / 2.0).sqrt() * legendre_dx(k + 1, x)
}

/// First derivative phi_k'(x)
pub fn phi_dx(k: usize, x: f64) -> f64 {
    debug_assert!(k <= MAX_KERNEL);
    let n = (k + 2) as f64;
    -4.0 / ((n - 1.0) * n) * ((2.0 * n - 1.0) / 2.0).sqrt() * legendre_dxx(k + 1, x)
}
