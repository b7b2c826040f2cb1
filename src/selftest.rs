//! # Selftest — Runtime Sanity Battery
//!
//! A condensed, always-compiled subset of the test suite, runnable in the
//! field with `--self-test`: modular primitives, symbol tables, the ring
//! identities, both primality deciders, the frame codec, the candidate
//! stream and the big-integer reducers. Prints one line per category and
//! reports overall pass/fail.

use rug::Integer;

use crate::coordinator::count_from_rate;
use crate::lcg::{number_to_seed, seed_to_number, Lcg};
use crate::tlv::{decode, encode, Frame, FrameType};
use crate::{bignum, kernel, modmath, ring};

fn check(failures: &mut u32, name: &str, pass: bool) {
    if pass {
        println!("{name} ... ok");
    } else {
        println!("{name} ... FAILED");
        *failures += 1;
    }
}

/// Run every category; `true` when all pass.
pub fn run() -> bool {
    let mut failures = 0u32;

    check(&mut failures, "modular operations", {
        modmath::square_mod(10103, 10101) == 4
            && modmath::mul_mod(10103, 10103, 10101) == 4
            && modmath::shift_mod(1, 16, 65535) == 1
            && modmath::shift_mod(1, 32, 65535) == 1
            && modmath::shift_mod(3 << 47, 13, (1 << 60) - 1) == 3
            && modmath::long_mod(0, u64::MAX, 0x8765432187654321) == 8690466094656961758
            && modmath::long_mod(1, u64::MAX, 0x8765432187654321) == 7624654210261333660
            && modmath::div2_mod(7, 101) == 54
    });

    check(&mut failures, "perfect powers", {
        !modmath::is_perfect_square(6)
            && modmath::is_perfect_square(64)
            && !modmath::is_perfect_square(0x1002000)
            && modmath::is_perfect_square(0x1002001)
            && modmath::is_perfect_cube(0x1003003001)
            && !modmath::is_perfect_cube(81)
            && modmath::is_perfect_fifth(0x100500A00A005001)
            && !modmath::is_perfect_fifth(81)
    });

    check(&mut failures, "gcd and inverse", {
        modmath::gcd(12, 15) == 3
            && modmath::gcd(12, 30) == 6
            && modmath::mul_mod(modmath::mod_inv(10, 1_000_003), 10, 1_000_003) == 1
            && modmath::mod_inv(6, 9) == 0
    });

    check(&mut failures, "jacobi", {
        modmath::jacobi(33, 9999) == 0
            && modmath::jacobi(34, 9999) == -1
            && modmath::jacobi(35, 9999) == 1
    });

    check(&mut failures, "kronecker", {
        modmath::kronecker(33, 9999) == 0
            && modmath::kronecker(34, 9999) == -1
            && modmath::kronecker(35, 9999) == 1
            && modmath::kronecker(11, 101) == -1
            && modmath::kronecker(-11, 101) == -1
            && modmath::kronecker(13, 101) == 1
            && modmath::kronecker(-13, 101) == 1
            && modmath::kronecker(-1, 101) == 1
            && modmath::kronecker(0, 101) == 0
            && modmath::kronecker(1, 0) == 1
            && modmath::kronecker(2, 0) == 0
            && modmath::kronecker(13, -101) == 1
            && modmath::kronecker(-13, -101) == -1
            && modmath::kronecker(-2, -11) == -1
            && modmath::kronecker(-2, -7) == 1
            && modmath::kronecker(-2, 1) == 1
            && modmath::kronecker(2, -9) == 1
            && modmath::kronecker(3, 13) == 1
            && modmath::kronecker(-3, 13) == 1
    });

    check(&mut failures, "base-2 exponentiation", {
        (0..6u64).all(|k| {
            let e = 12345 + k * 977;
            modmath::pow2_mod(e, 1_000_003) == slow_pow2(e, 1_000_003)
                && modmath::pow_mod(2, e, 1_000_003) == slow_pow2(e, 1_000_003)
        })
    });

    check(&mut failures, "ring exponentiation", {
        ring::pow_mod_x2_plus_1(1, 2, 2, 101) == (4, 3)
            && ring::pow_mod_x2_plus_1(1, 2, 3, 101) == (11, 2)
            && ring::pow_mod_x2_plus_1(1, 2, 104, 103) == (0, 5)
            && ring::pow_mod_x2_plus_2(1, 2, 30, 29) == (0, 6)
    });

    check(&mut failures, "primality kernel", {
        let primes: &[u64] = &[
            (1 << 13) - 1,
            (1 << 17) - 1,
            (1 << 31) - 1,
            (1 << 61) - 1,
            101,
            4493,
            200_003,
            2_000_003,
            20_000_003,
            2_000_000_000_003,
            20_000_000_000_000_003,
            200_000_000_000_000_003,
        ];
        let composites: &[u64] = &[9, 15, 21, 25, 49, 121, 169, 2047, 561];
        primes
            .iter()
            .all(|&p| kernel::miller_rabin(p) && kernel::quadratic_prime(p))
            && composites
                .iter()
                .all(|&c| !kernel::miller_rabin(c) && !kernel::quadratic_prime(c))
    });

    check(&mut failures, "frame codec", {
        let f = Frame::new(FrameType::Seed, 7, 0x01020304050607080910111213141516);
        let bytes = encode(&f);
        bytes.len() == 21
            && bytes[5] == 0x16
            && decode(&bytes).map(|(d, _)| d == f).unwrap_or(false)
            && decode(&[1, 0, 0, 0, 0]).is_err()
    });

    check(&mut failures, "candidate stream", {
        let mut a = Lcg::with_params(137, 13, (1 << 60) - 1, 999);
        let mut b = a.clone();
        for _ in 0..57 {
            a.next();
        }
        b.advance(57) == a.current()
            && seed_to_number(number_to_seed(0x5f5e101)) == 0x5f5e101
            && count_from_rate(20_000) & 1 == 1
    });

    check(&mut failures, "big-integer reducers", {
        let m127 = Integer::from(Integer::from(1) << 127) - 1u32;
        let m89 = Integer::from(Integer::from(1) << 89) - 1u32;
        bignum::quadratic_prime(&m127)
            && bignum::quadratic_prime(&m89)
            && !bignum::quadratic_prime(&Integer::from(&m127 * 3u32))
            && !bignum::quadratic_prime(&Integer::from(&m127 * &m89))
            && bignum::composite_sieve(&Integer::from(&m127 * 5u32))
                == kernel::SmallFactor::Composite
    });

    failures == 0
}

fn slow_pow2(mut e: u64, m: u64) -> u64 {
    let mut s = 2u64 % m;
    let mut r = 1u64 % m;
    while e != 0 {
        if e & 1 == 1 {
            r = modmath::mul_mod(r, s, m);
        }
        s = modmath::square_mod(s, m);
        e >>= 1;
    }
    r
}
