/// Numerically stable softmax over natural-log weights.
///
/// The maximum weight is subtracted before exponentiating. Returns `None` when any weight
/// is non-finite or the normalizing sum degenerates.
pub fn softmax(log_weights: &[f64]) -> Option<Vec<f64>> {
    if log_weights.iter().any(|w| !w.is_finite()) {
        return None;
    }
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = log_weights
        .iter()
        .map(|w| (w - max).exp())
        .collect::<Vec<_>>();
    normalize(&exps)
}

/// Divides each weight by the total.
///
/// Returns `None` when a weight is negative or non-finite, or when the total is not
/// strictly positive.
pub fn normalize(weights: &[f64]) -> Option<Vec<f64>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return None;
    }
    let sum = weights.iter().sum::<f64>();
    if !sum.is_finite() || sum <= 0.0 {
        return None;
    }
    Some(weights.iter().map(|w| w / sum).collect())
}

pub fn arithmetic_mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Population (ddof = 0) standard deviation around a precomputed mean.
pub fn population_std(x: &[f64], mean: f64) -> f64 {
    let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / x.len() as f64;
    variance.sqrt()
}

/// Standardizes `x` against the population mean and standard deviation of its finite
/// values.
///
/// Non-finite entries get 0.0 and do not enter the moments. Input with no spread among its
/// finite values (constant or empty) gives 0.0 everywhere.
pub fn z_scores(x: &[f64]) -> Vec<f64> {
    let finite = x.iter().copied().filter(|v| v.is_finite()).collect::<Vec<_>>();
    if finite.is_empty() {
        return vec![0.0; x.len()];
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = arithmetic_mean(&finite);
    let std = population_std(&finite, mean);
    if min == max || std == 0.0 || !std.is_finite() {
        return vec![0.0; x.len()];
    }
    x.iter()
        .map(|v| if v.is_finite() { (v - mean) / std } else { 0.0 })
        .collect()
}

/// 1-based ranks by descending value; ties keep their input order.
pub fn descending_ranks(x: &[f64]) -> Vec<usize> {
    let mut order = (0..x.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| x[b].total_cmp(&x[a]));
    let mut ranks = vec![0; x.len()];
    for (position, index) in order.into_iter().enumerate() {
        ranks[index] = position + 1;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[10.0, 9.0, 8.0]).unwrap();
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
        assert_relative_eq!(probs[0] / probs[1], std::f64::consts::E, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_survives_huge_weights() {
        let probs = softmax(&[300.0, 299.0, 5.0]).unwrap();
        assert!(probs.iter().all(|p| p.is_finite()));
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_rejects_non_finite() {
        assert!(softmax(&[1.0, f64::INFINITY]).is_none());
        assert!(softmax(&[f64::NAN]).is_none());
        assert!(softmax(&[]).is_none());
    }

    #[test]
    fn test_normalize() {
        let probs = normalize(&[2.0, 1.0, 1.0]).unwrap();
        assert_eq!(probs, vec![0.5, 0.25, 0.25]);
        assert!(normalize(&[0.0, 0.0]).is_none());
        assert!(normalize(&[1.0, -0.5]).is_none());
    }

    #[test]
    fn test_arithmetic_mean() {
        let x = vec![1., 2., 3.];
        assert_relative_eq!(arithmetic_mean(&x), 2.0);
    }

    #[test]
    fn test_population_std() {
        let x = vec![2., 4., 4., 4., 5., 5., 7., 9.];
        assert_relative_eq!(population_std(&x, arithmetic_mean(&x)), 2.0);
    }

    #[test]
    fn test_z_scores_single_outlier() {
        let mut x = vec![0.0; 99];
        x.push(10.0);
        let z = z_scores(&x);
        assert!(z[99].is_finite() && z[99] > 0.0);
        assert!(z[0] < 0.0);
    }

    #[test]
    fn test_z_scores_constant_input() {
        assert_eq!(z_scores(&[0.0, 0.0, 0.0]), vec![0.0; 3]);
        assert_eq!(z_scores(&[0.1, 0.1, 0.1]), vec![0.0; 3]);
        assert!(z_scores(&[]).is_empty());
    }

    #[test]
    fn test_z_scores_ignore_non_finite_values() {
        let z = z_scores(&[f64::NAN, 3.0, 0.0, f64::INFINITY]);
        assert_eq!(z[0], 0.0);
        assert_relative_eq!(z[1], 1.0);
        assert_relative_eq!(z[2], -1.0);
        assert_eq!(z[3], 0.0);
        assert_eq!(z_scores(&[f64::NAN, f64::NAN]), vec![0.0; 2]);
    }

    #[test]
    fn test_descending_ranks_with_ties() {
        let ranks = descending_ranks(&[1.0, 5.0, 1.0, 3.0]);
        assert_eq!(ranks, vec![3, 1, 4, 2]);
    }
}
