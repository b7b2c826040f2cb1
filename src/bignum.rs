//! # Bignum — Arbitrary-Precision Quadratic Test
//!
//! The quadratic test above the 61-bit kernel range, over [`rug::Integer`]
//! (GMP). Identical contract to the 64-bit kernel, generalized to multi-limb
//! moduli; the interesting part is [`Reducer`], a per-modulus reduction plan
//! precomputed once and reused across the whole exponentiation:
//!
//! - `m = 2^s − e` (e one limb, s > 128): fold `r = hi·2^s + lo` into
//!   `lo + hi·e` until the high part vanishes — O(1) iterations.
//! - `m = 2^(s−1) + e`: symmetric with subtraction; when `lo < hi·e` a
//!   multiple of `m` is added before subtracting.
//! - `m = B·2^s2 + 1` with `s2 >= 64` (Proth form): Montgomery reduction on
//!   base `2^s2`; one reduction is two multiplications by `B`, using
//!   `B·2^s2 ≡ −1 (mod m)`. Operands enter the Montgomery domain scaled by
//!   `2^(2·s2)` and leave through one ordinary fast reduction.
//! - anything else: Barrett with precomputed `b = ⌊2^(3s/2)/m⌋` and
//!   `a = 2^(3s/2) mod m`; the top quarter folds via `hi·a + lo`, then the
//!   regular Barrett step, then at most a few subtractions of `m`.
//!
//! `reduce` leaves values in `[0, 2^s)`, not necessarily below `m`;
//! `finalize` subtracts the modulus down to a canonical representative.
//! The small-factor sieve for multi-limb input first folds the candidate
//! modulo `2^60−1`, `2^56−1`, `2^36−1` and `2^44−1` (each divisible by a
//! known prime set) and runs the multiply-and-compare divisibility tests on
//! the 64-bit residues.

use rug::Integer;

use crate::kernel::{self, SmallFactor};
use crate::modmath::{jacobi, SQUARE_MASKS};

/// Reduction strategy selected for a modulus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Form {
    /// `m = 2^s − e`, `e` one limb.
    PowTwoMinusE,
    /// `m = 2^(s−1) + e`, `e` one limb.
    PowTwoPlusE,
    /// `m = B·2^s2 + 1`, Montgomery on base `2^s2`.
    Proth,
    /// Generic Barrett.
    Barrett,
}

/// Precomputed fast-reduction plan for one odd modulus.
pub struct Reducer {
    m: Integer,
    /// bit length of m
    n: u32,
    /// reduction half-threshold
    n2: u32,
    /// Barrett threshold, `n + n2`
    n32: u32,
    /// small part of a special-form modulus
    e: u64,
    /// Barrett remainder `2^n32 mod m`, or `2^n32 mod m` for Proth
    a: Integer,
    /// Barrett quotient `2^n32 / m`, or the Proth multiplier `B`
    b: Integer,
    form: Form,
}

impl Reducer {
    /// Classify `m` and precompute the reduction constants.
    pub fn new(m: &Integer) -> Self {
        let n = m.significant_bits();
        let mut r = Reducer {
            m: m.clone(),
            n,
            n2: 0,
            n32: 0,
            e: 0,
            a: Integer::new(),
            b: Integer::new(),
            form: Form::Barrett,
        };

        // a power of 2 minus e
        let tmp = Integer::from(Integer::from(1) << n) - m;
        if n > 128 && tmp.significant_bits() <= 64 {
            r.e = tmp.to_u64().unwrap_or(0);
            r.form = Form::PowTwoMinusE;
            return r;
        }

        // a power of 2 plus e
        let tmp = Integer::from(m - (Integer::from(1) << (n - 1)));
        if n > 128 && tmp.significant_bits() <= 64 {
            r.e = tmp.to_u64().unwrap_or(0);
            r.form = Form::PowTwoPlusE;
            return r;
        }

        // a Proth number B·2^n2 + 1
        let n2 = (n + 1) / 2;
        let low = m.clone().keep_bits(n2);
        if n2 >= 64 && low == 1 {
            let mut n2 = n2;
            while !m.get_bit(n2) {
                n2 += 1;
            }
            r.n2 = n2;
            r.n32 = n + n2;
            r.b = Integer::from(m >> n2);
            r.a = Integer::from(Integer::from(1) << r.n32) % m;
            r.form = Form::Proth;
            return r;
        }

        // a variant of Barrett reduction: b = 2^(3n/2) / m, a = 2^(3n/2) % m
        r.n2 = n >> 1;
        r.n32 = n + r.n2;
        let (q, rem) = Integer::from(Integer::from(1) << r.n32).div_rem(m.clone());
        r.b = q;
        r.a = rem;
        r.form = Form::Barrett;
        r
    }

    pub fn form(&self) -> Form {
        self.form
    }

    pub fn modulus(&self) -> &Integer {
        &self.m
    }

    /// Whether operands must pass through the Montgomery domain.
    pub fn montgomery(&self) -> bool {
        self.form == Form::Proth
    }

    /// Fast reduction of `r` into `[0, 2^n)`. For the Proth form this is a
    /// Montgomery REDC step (divides by `2^(2·n2)`).
    pub fn reduce(&self, r: &mut Integer) {
        match self.form {
            Form::Proth => {
                if r.significant_bits() > 2 * self.n + 2 {
                    let hi = Integer::from(&*r >> self.n32);
                    if hi != 0 {
                        r.keep_bits_mut(self.n32);
                        *r += hi * &self.a;
                    }
                }
                // two halving steps: hi·2^n2 + lo  →  lo·B − hi
                let hi = Integer::from(&*r >> self.n2);
                r.keep_bits_mut(self.n2);
                let tmp = Integer::from(&*r * &self.b) - hi;
                let hi = Integer::from(&tmp >> self.n2);
                let lo = tmp.keep_bits(self.n2);
                *r = lo * &self.b - hi;
                if r.is_negative() {
                    *r += &self.m;
                } else if &*r >= &self.m {
                    *r -= &self.m;
                }
            }
            Form::PowTwoMinusE => {
                // while (hi != 0) r = lo + hi·e
                let mut hi = Integer::from(&*r >> self.n);
                while hi != 0 {
                    r.keep_bits_mut(self.n);
                    *r += hi * self.e;
                    hi = Integer::from(&*r >> self.n);
                }
            }
            Form::PowTwoPlusE => {
                // while (hi > 1) r = lo − hi·e, lifting by a multiple of m
                // when the subtraction would go negative
                let base = self.n - 1;
                let mut hi = Integer::from(&*r >> base);
                while hi > 1 {
                    let lo = Integer::from(r.clone().keep_bits(base));
                    let t = hi * self.e;
                    if lo >= t {
                        *r = lo - t;
                    } else {
                        let k = Integer::from(&t >> base) + 1;
                        *r = k * &self.m + lo - t;
                    }
                    hi = Integer::from(&*r >> base);
                }
            }
            Form::Barrett => {
                // fold down to about 2n bits
                let top = self.n32 + self.n2;
                let mut hi = Integer::from(&*r >> top);
                while hi != 0 {
                    r.keep_bits_mut(top);
                    *r += Integer::from(hi * &self.a) << self.n2;
                    hi = Integer::from(&*r >> top);
                }

                // down to about 3n/2 bits
                let hi = Integer::from(&*r >> self.n32);
                if hi != 0 {
                    r.keep_bits_mut(self.n32);
                    *r += hi * &self.a;
                }

                // the regular Barrett step, down to about n bits
                let q = Integer::from(Integer::from(&*r >> self.n) * &self.b) >> self.n2;
                *r -= q * &self.m;

                // down to exactly n bits
                while Integer::from(&*r >> self.n) != 0 {
                    *r -= &self.m;
                }
            }
        }
    }

    /// Lift a negative intermediate back above zero with a shifted multiple
    /// of the modulus.
    pub fn positive_reduce(&self, r: &mut Integer) {
        if r.is_negative() {
            let bits = r.significant_bits() as i64 - self.n as i64;
            let bits = if bits < 0 { 1 } else { bits + 1 };
            *r += Integer::from(&self.m << bits as u32);
        }
    }

    /// Enter the Montgomery domain (no-op for non-Proth forms).
    pub fn to_montgomery(&self, v: &mut Integer) {
        if self.montgomery() {
            *v <<= 2 * self.n2;
            *v %= &self.m;
        }
    }

    /// Leave the Montgomery domain (no-op for non-Proth forms).
    pub fn from_montgomery(&self, v: &mut Integer) {
        if self.montgomery() {
            self.reduce(v);
        }
    }

    /// Subtract the modulus down to the canonical `[0, m)` representative.
    pub fn finalize(&self, r: &mut Integer) {
        while &*r >= &self.m {
            *r -= &self.m;
        }
    }
}

/// `x mod (2^b − 1)` folded into 64 bits.
pub fn mersenne_mod(x: &Integer, b: u32) -> u64 {
    let mut r = x.clone();
    while r.significant_bits() > b {
        let hi = Integer::from(&r >> b);
        r.keep_bits_mut(b);
        r += hi;
    }
    r.to_u64().unwrap_or(0)
}

// Divisibility constants (p⁻¹ mod 2^64, ⌊(2^64−1)/p⌋) for the primes known
// to divide each Mersenne-style pre-reduction modulus.

// 2^60 − 1 is divisible by 3, 5, 7, 11, 13, 31, 41, 61, 151, ...
const M60_TESTS: [(u64, u64); 9] = [
    (0xaaaaaaaaaaaaaaab, 0x5555555555555555), // 3
    (0xcccccccccccccccd, 0x3333333333333333), // 5
    (0x6db6db6db6db6db7, 0x2492492492492492), // 7
    (0x2e8ba2e8ba2e8ba3, 0x1745d1745d1745d1), // 11
    (0x4ec4ec4ec4ec4ec5, 0x13b13b13b13b13b1), // 13
    (0xef7bdef7bdef7bdf, 0x0842108421084210), // 31
    (0x8f9c18f9c18f9c19, 0x063e7063e7063e70), // 41
    (0x4fbcda3ac10c9715, 0x04325c53ef368eb0), // 61
    (0x6fe4dfc9bf937f27, 0x01b2036406c80d90), // 151
];

// 2^56 − 1 is divisible by 3, 5, 17, 29, 43, 113, 127, ...
const M56_TESTS: [(u64, u64); 5] = [
    (0xf0f0f0f0f0f0f0f1, 0x0f0f0f0f0f0f0f0f), // 17
    (0x34f72c234f72c235, 0x08d3dcb08d3dcb08), // 29
    (0x82fa0be82fa0be83, 0x05f417d05f417d05), // 43
    (0x90fdbc090fdbc091, 0x0243f6f0243f6f02), // 113
    (0x7efdfbf7efdfbf7f, 0x0204081020408102), // 127
];

// 2^36 − 1 is divisible by 3, 5, 7, 19, 37, 73, 109, ...
const M36_TESTS: [(u64, u64); 4] = [
    (0x86bca1af286bca1b, 0x0d79435e50d79435), // 19
    (0x14c1bacf914c1bad, 0x06eb3e45306eb3e4), // 37
    (0x7e3f1f8fc7e3f1f9, 0x0381c0e070381c0e), // 73
    (0xa6c0964fda6c0965, 0x02593f69b02593f6), // 109
];

// 2^44 − 1 is divisible by 3, 5, 23, 89, ...
const M44_TESTS: [(u64, u64); 2] = [
    (0xd37a6f4de9bd37a7, 0x0b21642c8590b216), // 23
    (0xf47e8fd1fa3f47e9, 0x02e05c0b81702e05), // 89
];

/// Small-factor pre-filter for arbitrary-precision candidates: 64-bit inputs
/// go straight to the kernel sieve, larger ones are folded modulo four
/// Mersenne-style moduli before the per-prime divisibility tests.
pub fn composite_sieve(n: &Integer) -> SmallFactor {
    if n.significant_bits() <= 64 {
        return kernel::small_factor_sieve(n.to_u64().unwrap_or(0));
    }

    let a = mersenne_mod(n, 60);
    for &(mul, limit) in &M60_TESTS {
        if kernel::divisible(a, mul, limit) {
            return SmallFactor::Composite;
        }
    }
    let a = mersenne_mod(n, 56);
    for &(mul, limit) in &M56_TESTS {
        if kernel::divisible(a, mul, limit) {
            return SmallFactor::Composite;
        }
    }
    let a = mersenne_mod(n, 36);
    for &(mul, limit) in &M36_TESTS {
        if kernel::divisible(a, mul, limit) {
            return SmallFactor::Composite;
        }
    }
    let a = mersenne_mod(n, 44);
    for &(mul, limit) in &M44_TESTS {
        if kernel::divisible(a, mul, limit) {
            return SmallFactor::Composite;
        }
    }

    SmallFactor::Undecided
}

// 64·63·55·61·59·53·47·43·41·37 and 31·29·23·19·17·13: the two residues
// that feed every mask in the shared non-residue table.
const SQUARE_RESIDUE_PRODUCT_A: u64 = 129_685_918_863_695_040;
const SQUARE_RESIDUE_PRODUCT_B: u64 = 86_822_723;

/// Perfect-square test for arbitrary precision: mask rejection from two
/// 64-bit residues, then the exact integer square root.
pub fn is_perfect_square(n: &Integer) -> bool {
    let a = Integer::from(n % SQUARE_RESIDUE_PRODUCT_A).to_u64().unwrap_or(0);
    let b = Integer::from(n % SQUARE_RESIDUE_PRODUCT_B).to_u64().unwrap_or(0);
    for (i, &(mask, m)) in SQUARE_MASKS.iter().enumerate() {
        let r = if i < 11 { a } else { b };
        if mask & (1u64 << (r % m)) != 0 {
            return false;
        }
    }
    n.is_perfect_square()
}

/// `(s·x + t)^e` in `Z/mZ[x]/(x² − σ·a)` by double-and-add, with every
/// intermediate going through the reducer. Inputs must satisfy `s, t < m`;
/// outputs are canonical.
pub fn exponentiate(
    s: &mut Integer,
    t: &mut Integer,
    e: &Integer,
    p: &Reducer,
    sgn: i32,
    a: u64,
) {
    let mut bit = e.significant_bits() - 1;

    // the multiply-step constant stays plain: with the reducer stripping one
    // Montgomery factor per iteration, a scaled t0 would skew every add step
    let t0 = t.clone();
    p.to_montgomery(s);
    p.to_montgomery(t);

    while bit > 0 {
        bit -= 1;
        // double: s, t = 2st, σ·a·s² + t²
        let t2 = Integer::from(&*t * &*t);
        let s2 = if sgn < 0 {
            // s·(m − s) ≡ −s²
            let mut tmp = Integer::from(&p.m - &*s);
            p.positive_reduce(&mut tmp);
            Integer::from(&*s * &tmp)
        } else {
            Integer::from(&*s * &*s)
        };
        *s *= &*t;
        *s <<= 1;
        *t = s2 * a + t2;

        if e.get_bit(bit) {
            // add: s, t = s·t0 + t, t·t0 + σ·a·s
            let tmp = Integer::from(&*s * a);
            *s *= &t0;
            *s += &*t;
            *t *= &t0;
            if sgn < 0 {
                *t -= tmp;
                p.positive_reduce(t);
            } else {
                *t += tmp;
            }
        }

        p.reduce(s);
        p.reduce(t);
    }

    p.from_montgomery(s);
    p.from_montgomery(t);

    p.finalize(s);
    p.finalize(t);
}

/// The quadratic test over arbitrary precision. Values below 2^61 bounce to
/// the 64-bit kernel; the rest follow the same `n mod 8` case split with the
/// reducer-backed exponentiation.
pub fn quadratic_prime(n: &Integer) -> bool {
    if n.significant_bits() <= 61 {
        return kernel::quadratic_prime(n.to_u64().unwrap_or(0));
    }

    if n.is_even() {
        return *n == 2;
    }

    match composite_sieve(n) {
        SmallFactor::Composite => return false,
        SmallFactor::Prime => return true,
        SmallFactor::Undecided => {}
    }

    let mod8 = n.mod_u(8);
    let mut bs = Integer::from(1);
    let mut bt = Integer::from(2);
    let e = Integer::from(n + 1u32);
    let reducer = Reducer::new(n);

    if mod8 == 3 || mod8 == 7 {
        // (x+2)^(n+1) mod (n, x²+1) == 5
        exponentiate(&mut bs, &mut bt, &e, &reducer, -1, 1);
        return bs == 0 && bt == 5;
    }
    if mod8 == 5 {
        // (x+2)^(n+1) mod (n, x²+2) == 6
        exponentiate(&mut bs, &mut bt, &e, &reducer, -1, 2);
        return bs == 0 && bt == 6;
    }

    // mod8 == 1
    if is_perfect_square(n) {
        return false;
    }

    // least odd prime a with (a/n) = −1; the symbol only depends on
    // n mod 4a, so it is evaluated on the 64-bit residue
    let mut a = 3u64;
    loop {
        if kernel::quadratic_prime(a) {
            let j = jacobi(a, n.mod_u(4 * a as u32) as u64);
            if j == 0 {
                return false;
            }
            if j == -1 {
                break;
            }
        }
        a += 2;
    }

    // (x+2)^(n+1) mod (n, x²+a) == 4+a
    exponentiate(&mut bs, &mut bt, &e, &reducer, -1, a);
    if !(bs == 0 && bt == a + 4) {
        return false;
    }

    // (x+2)^(n+1) mod (n, x²−a) == 4−a
    let mut bs = Integer::from(1);
    let mut bt = Integer::from(2);
    exponentiate(&mut bs, &mut bt, &e, &reducer, 1, a);
    let expected = Integer::from(n - a) + 4u32;
    let expected = expected % n;
    bs == 0 && bt == expected
}
