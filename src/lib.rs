//! # Lnrc — Core Library
//!
//! A distributed scan for counterexamples to a conjectured primality test.
//! Every odd number `n = 2s + 1` below the 61-bit bound is run through two
//! independent deciders — deterministic Miller-Rabin and the quadratic test
//! `(x+2)^(n+1)` evaluated in `Z/nZ[x]/(x² ± a)` — and any disagreement is
//! the scientific output: a *pseudoprime* (composite passing the quadratic
//! test) or a *pseudocomposite* (prime failing it, refuting the conjecture).
//!
//! ## Module Organization
//!
//! **Arithmetic core** (no I/O anywhere):
//! - [`modmath`] — 64-bit modular primitives, Jacobi/Kronecker symbols,
//!   perfect-power detection
//! - [`ring`] — `(s·x + t)^e` in the quadratic quotient ring, per-modulus
//!   specializations
//! - [`kernel`] — small-factor sieve, deterministic Miller-Rabin, the
//!   quadratic test for 61-bit candidates
//! - [`bignum`] — the same test over `rug::Integer` with per-modulus fast
//!   reduction (2^s ± e, Proth/Montgomery, Barrett)
//! - [`lcg`] — the seekable candidate stream
//!
//! **Distribution** (tokio, TLV frames over TCP):
//! - [`tlv`] — the length-prefixed frame codec
//! - [`coordinator`] — block ledger, assignment, liveness, anomaly log
//! - [`worker`] — the scanning client
//! - [`proxy`] — many local workers multiplexed onto one upstream socket
//!
//! [`selftest`] bundles a runtime sanity battery behind the `--self-test`
//! flag.
//!
//! ## Data Flow
//!
//! ```text
//! worker READY → coordinator pops a dead block or cuts the cursor
//!              → SEED, COUNT, GO → worker scans count candidates
//!              → PSEUDOPRIME / PSEUDOCOMPOSITE findings → READY
//! ```

pub mod bignum;
pub mod coordinator;
pub mod kernel;
pub mod lcg;
pub mod modmath;
pub mod proxy;
pub mod ring;
pub mod selftest;
pub mod tlv;
pub mod worker;

/// Default coordinator listen port.
pub const SERVER_PORT: u16 = 15002;
/// Conventional proxy port; the CLI wires the proxy to `port + 1`.
pub const PROXY_PORT: u16 = 15001;
/// Logical channel id space, a power of two.
pub const MAX_CID: usize = 2048;
