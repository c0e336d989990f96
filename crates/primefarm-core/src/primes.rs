//! Primality routine run by compute workers.
//!
//! The scheduler treats this as an opaque pure function, `Chunk -> primes`,
//! plus the time it took. Workers call [`compute`] on a blocking thread.

use crate::{Chunk, ComputeResult};
use std::time::Instant;

/// Returns `true` if `n` is prime.
///
/// Trial division by 2, 3 and then numbers of the form 6k ± 1 up to `√n`.
/// Negative numbers, 0 and 1 are not prime.
pub fn is_prime(n: i64) -> bool {
    let Ok(n) = u64::try_from(n) else {
        return false;
    };
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    // `n <= i64::MAX`, so `i` stays below 2^32 and `i * i` cannot overflow.
    let mut i: u64 = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Collects every prime contained in `chunk`, in ascending order.
pub fn primes_in(chunk: &Chunk) -> Vec<i64> {
    chunk.iter().filter(|&n| is_prime(n)).collect()
}

/// Runs [`primes_in`] and measures how long it took.
pub fn compute(chunk: &Chunk) -> ComputeResult {
    let start = Instant::now();
    let primes = primes_in(chunk);
    ComputeResult {
        primes,
        elapsed: start.elapsed(),
    }
}

/// Sieve of Eratosthenes over `[2, limit]`.
///
/// Independent reference used to check the trial-division routine and the
/// scheduler's end-to-end output.
pub fn sieve(limit: usize) -> Vec<i64> {
    if limit < 2 {
        return Vec::new();
    }
    let mut composite = vec![false; limit + 1];
    let mut primes = Vec::new();
    for n in 2..=limit {
        if composite[n] {
            continue;
        }
        primes.push(n as i64);
        let mut multiple = n * n;
        while multiple <= limit {
            composite[multiple] = true;
            multiple += n;
        }
    }
    primes
}
