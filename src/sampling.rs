//! Categorical draws shared by the samplers.

use rand::Rng;

/// Draw an index with probability proportional to its weight.
///
/// Weights are expected to sum to one. Rounding mass left past the end goes
/// to the last positive weight; `None` when no weight is positive.
pub(crate) fn draw_index<R, I>(rng: &mut R, weights: I) -> Option<usize>
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = f64>,
{
    let r: f64 = rng.gen();
    let mut cumsum = 0.0;
    let mut last_positive = None;
    for (i, w) in weights.into_iter().enumerate() {
        if w > 0.0 {
            last_positive = Some(i);
        }
        cumsum += w;
        if r < cumsum {
            return Some(i);
        }
    }
    last_positive
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_degenerate_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(draw_index(&mut rng, [0.0, 1.0, 0.0]), Some(1));
        }
        assert_eq!(draw_index(&mut rng, [0.0, 0.0]), None);
        assert_eq!(draw_index(&mut rng, std::iter::empty()), None);
    }

    #[test]
    fn test_leftover_mass_goes_to_last_positive() {
        let mut rng = StdRng::seed_from_u64(7);
        // total mass well below one
        for _ in 0..100 {
            let i = draw_index(&mut rng, [1e-9, 0.0]).unwrap();
            assert_eq!(i, 0);
        }
    }

    #[test]
    fn test_frequencies() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0usize; 3];
        for _ in 0..20_000 {
            counts[draw_index(&mut rng, [0.2, 0.5, 0.3]).unwrap()] += 1;
        }
        let freq: Vec<f64> = counts.iter().map(|&c| c as f64 / 20_000.0).collect();
        assert!((freq[0] - 0.2).abs() < 0.02);
        assert!((freq[1] - 0.5).abs() < 0.02);
        assert!((freq[2] - 0.3).abs() < 0.02);
    }
}
