//! # Ring — Exponentiation in `Z/nZ[x] / (x² − σ·a)`
//!
//! Double-and-add exponentiation of a degree-1 polynomial `s·x + t` in the
//! quotient ring `Z/nZ[x]/(x² − σ·a)` with `σ ∈ {+1, −1}`. This is the inner
//! loop of the quadratic primality test: one squaring plus (on set exponent
//! bits) one multiplication by the original constant `x + t₀` per bit.
//!
//! The identities, with reduction rule `x² = σ·a`:
//!
//! - square:   `(s·x + t)² = 2st·x + (t² + σ·a·s²)`
//! - multiply: `(s·x + t)(x + t₀) = (s·t₀ + t)·x + (t·t₀ + σ·a·s)`
//!
//! Four explicit entry points replace the compile-time specialization of a
//! generic routine: the hot moduli `x² + 1` and `x² + 2` get dedicated
//! arithmetic shortcuts (e.g. `t² − s²` computed as `n − s² + t²` to stay
//! non-negative, and `2n − 2s²` taken from `2n` before the subtraction so the
//! intermediate cannot wrap), while `x² ± a` take the generic path.
//!
//! All entry points require `n < 2^61` so every intermediate sum fits in 128
//! bits with three guard bits to spare, and return `(s, t)` fully reduced
//! into `[0, n)`.

use crate::modmath::{mul_mod, square_mod, wide_mod};

/// `(s·x + t)^e  mod (n, x² + 1)` — σ = −1, a = 1.
pub fn pow_mod_x2_plus_1(s: u64, t: u64, e: u64, n: u64) -> (u64, u64) {
    let t0 = t;
    let (mut s, mut t) = (s, t);
    let mut bit = crate::modmath::log2(e);
    while bit > 0 {
        bit -= 1;
        let t2 = square_mod(t, n);
        let s2 = square_mod(s, n);
        let mut ss = mul_mod(s, t, n);
        ss += ss;
        let tt = n - s2 + t2; // t² − s², kept non-negative

        if e & (1u64 << bit) != 0 {
            let tmp = (n + n - ss) as u128; // −2st mod-ish, still positive
            let ss2 = ss as u128 * t0 as u128 + tt as u128;
            let tt2 = tt as u128 * t0 as u128 + tmp;
            s = wide_mod(ss2, n);
            t = wide_mod(tt2, n);
        } else {
            s = ss % n;
            t = tt % n;
        }
    }
    (s, t)
}

/// `(s·x + t)^e  mod (n, x² + 2)` — σ = −1, a = 2.
pub fn pow_mod_x2_plus_2(s: u64, t: u64, e: u64, n: u64) -> (u64, u64) {
    let t0 = t;
    let (mut s, mut t) = (s, t);
    let mut bit = crate::modmath::log2(e);
    while bit > 0 {
        bit -= 1;
        let t2 = square_mod(t, n);
        let s2 = square_mod(s, n);
        let mut ss = mul_mod(s, t, n);
        ss += ss;
        let tt = n + n - (s2 + s2) + t2; // t² − 2s², subtracted from 2n first

        if e & (1u64 << bit) != 0 {
            let tmp = ((n + n - ss) as u128) << 1;
            let ss2 = ss as u128 * t0 as u128 + tt as u128;
            let tt2 = tt as u128 * t0 as u128 + tmp;
            s = wide_mod(ss2, n);
            t = wide_mod(tt2, n);
        } else {
            s = ss % n;
            t = tt % n;
        }
    }
    (s, t)
}

/// `(s·x + t)^e  mod (n, x² + a)` — σ = −1, generic odd `a < n`.
pub fn pow_mod_x2_plus_a(s: u64, t: u64, e: u64, n: u64, a: u64) -> (u64, u64) {
    let t0 = t;
    let (mut s, mut t) = (s, t);
    let mut bit = crate::modmath::log2(e);
    while bit > 0 {
        bit -= 1;
        let t2 = square_mod(t, n);
        let s2 = square_mod(s, n);
        let mut ss = mul_mod(s, t, n);
        ss += ss;
        let tt = mul_mod(s2, n - a, n) + t2;

        if e & (1u64 << bit) != 0 {
            let tmp = ss as u128 * (n - a) as u128;
            let ss2 = ss as u128 * t0 as u128 + tt as u128;
            let tt2 = tt as u128 * t0 as u128 + tmp;
            s = wide_mod(ss2, n);
            t = wide_mod(tt2, n);
        } else {
            s = ss % n;
            t = tt % n;
        }
    }
    (s, t)
}

/// `(s·x + t)^e  mod (n, x² − a)` — σ = +1, generic odd `a < n`.
pub fn pow_mod_x2_minus_a(s: u64, t: u64, e: u64, n: u64, a: u64) -> (u64, u64) {
    let t0 = t;
    let (mut s, mut t) = (s, t);
    let mut bit = crate::modmath::log2(e);
    while bit > 0 {
        bit -= 1;
        let t2 = square_mod(t, n);
        let s2 = square_mod(s, n);
        let mut ss = mul_mod(s, t, n);
        ss += ss;
        let tt = mul_mod(s2, a, n) + t2;

        if e & (1u64 << bit) != 0 {
            let tmp = ss as u128 * a as u128;
            let ss2 = ss as u128 * t0 as u128 + tt as u128;
            let tt2 = tt as u128 * t0 as u128 + tmp;
            s = wide_mod(ss2, n);
            t = wide_mod(tt2, n);
        } else {
            s = ss % n;
            t = tt % n;
        }
    }
    (s, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modmath::add_mod;

    /// Reference implementation: repeated ring multiplication, no shortcuts.
    /// `sigma_a` is σ·a as a signed value.
    fn slow_pow(s0: u64, t0: u64, e: u64, n: u64, sigma_a: i64) -> (u64, u64) {
        let aa = if sigma_a >= 0 {
            sigma_a as u64 % n
        } else {
            n - ((-sigma_a) as u64 % n)
        };
        let ring_mul = |(s1, t1): (u64, u64), (s2, t2): (u64, u64)| {
            // (s1·x + t1)(s2·x + t2) = (s1·t2 + s2·t1)·x + (t1·t2 + σa·s1·s2)
            let s = add_mod(mul_mod(s1, t2, n), mul_mod(s2, t1, n), n);
            let t = add_mod(mul_mod(t1, t2, n), mul_mod(aa, mul_mod(s1, s2, n), n), n);
            (s, t)
        };
        let mut acc = (0u64, 1u64);
        for _ in 0..e {
            acc = ring_mul(acc, (s0, t0));
        }
        acc
    }

    #[test]
    fn x2_plus_1_matches_reference() {
        let n = 1000003u64;
        for e in 1u64..=40 {
            assert_eq!(pow_mod_x2_plus_1(1, 2, e, n), slow_pow(1, 2, e, n, -1), "e={e}");
        }
    }

    #[test]
    fn x2_plus_2_matches_reference() {
        let n = 999983u64;
        for e in 1u64..=40 {
            assert_eq!(pow_mod_x2_plus_2(1, 2, e, n), slow_pow(1, 2, e, n, -2), "e={e}");
        }
    }

    #[test]
    fn x2_plus_a_matches_reference() {
        let n = 1000003u64;
        for a in [3u64, 5, 7, 11, 13] {
            for e in 1u64..=24 {
                assert_eq!(
                    pow_mod_x2_plus_a(1, 2, e, n, a),
                    slow_pow(1, 2, e, n, -(a as i64)),
                    "a={a} e={e}"
                );
            }
        }
    }

    #[test]
    fn x2_minus_a_matches_reference() {
        let n = 1000003u64;
        for a in [3u64, 5, 7, 11, 13] {
            for e in 1u64..=24 {
                assert_eq!(
                    pow_mod_x2_minus_a(1, 2, e, n, a),
                    slow_pow(1, 2, e, n, a as i64),
                    "a={a} e={e}"
                );
            }
        }
    }

    #[test]
    fn specialized_forms_agree_with_generic() {
        // x²+1 and x²+2 shortcuts against the generic σ=−1 path
        let n = (1u64 << 61) - 1;
        for e in [2u64, 3, 100, 12345, n - 1, n + 1] {
            assert_eq!(pow_mod_x2_plus_1(1, 2, e, n), pow_mod_x2_plus_a(1, 2, e, n, 1), "a=1 e={e}");
            assert_eq!(pow_mod_x2_plus_2(1, 2, e, n), pow_mod_x2_plus_a(1, 2, e, n, 2), "a=2 e={e}");
        }
    }

    #[test]
    fn frobenius_identity_for_primes() {
        // For prime p with (−a/p) = −1, x has order dividing p+1 up to
        // conjugation: (x+2)^(p+1) lands on the norm, a constant. Check the
        // constant coefficient only through the known-prime identities.
        // p ≡ 3 (mod 8): (x+2)^(p+1) ≡ 5 (mod p, x²+1)
        for p in [1000003u64, 19, 43, 59, 83] {
            if p & 7 == 3 || p & 7 == 7 {
                let (s, t) = pow_mod_x2_plus_1(1, 2, p + 1, p);
                assert_eq!((s, t), (0, 5), "p={p}");
            }
        }
        // p ≡ 5 (mod 8): (x+2)^(p+1) ≡ 6 (mod p, x²+2)
        for p in [13u64, 29, 37, 53, 61, 101] {
            if p & 7 == 5 && crate::kernel::miller_rabin(p) {
                let (s, t) = pow_mod_x2_plus_2(1, 2, p + 1, p);
                assert_eq!((s, t), (0, 6), "p={p}");
            }
        }
    }

    #[test]
    fn output_is_fully_reduced() {
        let n = 101u64;
        for e in 1u64..200 {
            let (s, t) = pow_mod_x2_plus_1(1, 2, e, n);
            assert!(s < n && t < n);
            let (s, t) = pow_mod_x2_minus_a(1, 2, e, n, 3);
            assert!(s < n && t < n);
        }
    }

    #[test]
    fn multiply_step_identity_hand_checked() {
        // (x+2)² = 2·2·x + (2² − 1) = 4x + 3 in Z/101[x]/(x²+1)
        let (s, t) = pow_mod_x2_plus_1(1, 2, 2, 101);
        assert_eq!((s, t), (4, 3));
        // (x+2)³ = (4x+3)(x+2) = (4·2+3)x + (3·2 − 4) = 11x + 2
        let (s, t) = pow_mod_x2_plus_1(1, 2, 3, 101);
        assert_eq!((s, t), (11, 2));
        // and in x²−3: (x+2)² = 4x + (4+3) = 4x + 7
        let (s, t) = pow_mod_x2_minus_a(1, 2, 2, 101, 3);
        assert_eq!((s, t), (4, 7));
    }
}
