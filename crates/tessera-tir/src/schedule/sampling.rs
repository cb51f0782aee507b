use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{ScheduleError, ScheduleResult};

use super::{LoopRV, Schedule};

impl Schedule {
    /// Samples `n` factors whose product is exactly the loop extent, outermost
    /// first. The innermost factor never exceeds `max_innermost_factor`
    /// (non-positive means unbounded).
    pub fn sample_perfect_tile(
        &mut self,
        loop_rv: LoopRV,
        n: usize,
        max_innermost_factor: i64,
    ) -> ScheduleResult<Vec<i64>> {
        let extent = self.for_loop(loop_rv)?.extent;
        if n == 0 {
            return Err(ScheduleError::InvalidSample("cannot tile into zero levels".to_string()));
        }
        if extent <= 0 {
            return Err(ScheduleError::InvalidSample(format!("loop {loop_rv} has extent {extent}")));
        }
        let factors = perfect_tile(self.rng(), extent, n, max_innermost_factor);
        self.record(
            "sample_perfect_tile",
            format!("{loop_rv}, {n} -> {factors:?}"),
        );
        Ok(factors)
    }

    /// Draws one candidate according to `probs`.
    pub fn sample_categorical(&mut self, candidates: &[i64], probs: &[f64]) -> ScheduleResult<i64> {
        if candidates.is_empty() || candidates.len() != probs.len() {
            return Err(ScheduleError::InvalidSample(format!(
                "{} candidates with {} probabilities",
                candidates.len(),
                probs.len()
            )));
        }
        let dist = WeightedIndex::new(probs)
            .map_err(|err| ScheduleError::InvalidSample(err.to_string()))?;
        let choice = candidates[dist.sample(self.rng())];
        self.record("sample_categorical", format!("{candidates:?} -> {choice}"));
        Ok(choice)
    }
}

fn perfect_tile<R: Rng>(rng: &mut R, extent: i64, n: usize, max_innermost: i64) -> Vec<i64> {
    if n == 1 {
        return vec![extent];
    }
    let divisors: Vec<i64> = divisors(extent)
        .into_iter()
        .filter(|d| max_innermost <= 0 || *d <= max_innermost)
        .collect();
    let innermost = divisors.choose(rng).copied().unwrap_or(1);

    let mut factors = vec![1; n];
    factors[n - 1] = innermost;
    for prime in prime_factors(extent / innermost) {
        let slot = rng.gen_range(0..n - 1);
        factors[slot] *= prime;
    }
    factors
}

/// Divisors of `value` in ascending order.
fn divisors(value: i64) -> Vec<i64> {
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1;
    while d * d <= value {
        if value % d == 0 {
            small.push(d);
            if d * d != value {
                large.push(value / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

fn prime_factors(mut value: i64) -> Vec<i64> {
    let mut out = Vec::new();
    let mut p = 2;
    while p * p <= value {
        while value % p == 0 {
            out.push(p);
            value /= p;
        }
        p += 1;
    }
    if value > 1 {
        out.push(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn perfect_tile_product_matches_extent() {
        let mut rng = StdRng::seed_from_u64(7);
        for extent in [1, 7, 12, 64, 96, 1000] {
            for n in 1..5 {
                let factors = perfect_tile(&mut rng, extent, n, 16);
                assert_eq!(factors.len(), n);
                assert_eq!(factors.iter().product::<i64>(), extent);
                assert!(n == 1 || factors[n - 1] <= 16);
            }
        }
    }

    #[test]
    fn divisors_come_in_ascending_pairs() {
        assert_eq!(divisors(1), vec![1]);
        assert_eq!(divisors(36), vec![1, 2, 3, 4, 6, 9, 12, 18, 36]);
        assert_eq!(divisors(97), vec![1, 97]);
        let large = divisors(1 << 40);
        assert_eq!(large.len(), 41);
        assert_eq!(large.last(), Some(&(1i64 << 40)));
    }

    #[test]
    fn prime_factors_of_composite() {
        assert_eq!(prime_factors(360), vec![2, 2, 2, 3, 3, 5]);
        assert_eq!(prime_factors(1), Vec::<i64>::new());
    }
}
