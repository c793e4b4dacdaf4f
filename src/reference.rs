use crate::error::{Result, SieveError};

/// Sequential odd-only Sieve of Eratosthenes
///
/// Used as the trusted oracle the pipeline is checked against.
/// - Index mapping: is_prime[i] represents the number (2*i + 3)
/// - Only marks odd multiples of odd primes, starting from p*p
/// - Space complexity: O(n/2)
///
/// Fails with `ResourceExhaustion` when the flag table for `limit` cannot be
/// addressed or allocated on this target.
pub fn primes_up_to(limit: u64) -> Result<Vec<u64>> {
    if limit < 2 {
        return Ok(vec![]);
    }
    if limit == 2 {
        return Ok(vec![2]);
    }

    // Start with 2, then find all odd primes
    let mut primes = vec![2];

    let size = odd_slots(limit)?;
    let mut is_prime = Vec::new();
    is_prime
        .try_reserve_exact(size)
        .map_err(|e| SieveError::ResourceExhaustion {
            what: "reference sieve",
            detail: e.to_string(),
        })?;
    is_prime.resize(size, true);

    for i in 0..size {
        if !is_prime[i] {
            continue;
        }
        let p = 2 * i as u64 + 3;
        let Some(square) = p.checked_mul(p) else {
            break;
        };
        if square > limit {
            break;
        }
        let Ok(step) = usize::try_from(p) else {
            break;
        };
        // square <= limit, so the start index is below size
        let start = ((square - 3) / 2) as usize;
        for j in (start..size).step_by(step) {
            is_prime[j] = false;
        }
    }

    for (i, &is_p) in is_prime.iter().enumerate() {
        if is_p {
            primes.push(2 * i as u64 + 3);
        }
    }

    Ok(primes)
}

/// Number of odd candidates in [3, limit], as a table length.
fn odd_slots(limit: u64) -> Result<usize> {
    let slots = limit.saturating_sub(1) / 2;
    usize::try_from(slots).map_err(|_| SieveError::ResourceExhaustion {
        what: "reference sieve",
        detail: format!("{} odd candidates exceed the address space", slots),
    })
}

/// Upper estimate of how many primes lie in [2, limit]: ceil(1.2 * n / ln n) + 1.
///
/// Only a preallocation hint for result storage, never a bound the
/// pipeline relies on.
pub fn prime_count_estimate(limit: u64) -> usize {
    if limit < 2 {
        return 0;
    }
    let n = limit as f64;
    (1.2 * (n / n.ln())).ceil() as usize + 1
}
