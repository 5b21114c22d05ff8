/// Histogram bin width for pedal values in `0..=1`.
pub const BIN_WIDTH: f64 = 0.05;

/// Representative pedal force of a window.
///
/// Values above `floor` are binned; the contiguous run of occupied bins with
/// the most samples wins (ties go to the run holding the single fullest bin).
/// Inside that run the fullest bin, plus neighbours holding at least half as
/// many samples, are averaged.
pub fn top_bin(values: &[f64], floor: f64) -> Option<f64> {
    let nbins = (1.0 / BIN_WIDTH).round() as usize + 1;
    let mut bins: Vec<Vec<f64>> = vec![Vec::new(); nbins];
    for v in values.iter().copied().filter(|v| v.is_finite() && *v > floor) {
        let b = ((v.clamp(0.0, 1.0) / BIN_WIDTH).round() as usize).min(nbins - 1);
        bins[b].push(v);
    }

    // contiguous runs of occupied bins
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < nbins {
        if bins[i].is_empty() {
            i += 1;
            continue;
        }
        let start = i;
        while i < nbins && !bins[i].is_empty() {
            i += 1;
        }
        runs.push((start, i));
    }

    let fullest = |(a, b): (usize, usize)| (a..b).map(|k| bins[k].len()).max().unwrap_or(0);
    let total = |(a, b): (usize, usize)| (a..b).map(|k| bins[k].len()).sum::<usize>();
    let (a, b) = runs
        .into_iter()
        .max_by(|x, y| total(*x).cmp(&total(*y)).then(fullest(*x).cmp(&fullest(*y))))?;

    // fullest bin, ties broken toward the more populated neighbourhood
    let neighbourhood = |k: usize| {
        let left = if k > a { bins[k - 1].len() } else { 0 };
        let right = if k + 1 < b { bins[k + 1].len() } else { 0 };
        left + right
    };
    let peak = (a..b).max_by(|x, y| {
        bins[*x].len().cmp(&bins[*y].len()).then(neighbourhood(*x).cmp(&neighbourhood(*y)))
    })?;

    let half = (bins[peak].len() + 1) / 2;
    let mut lo = peak;
    while lo > a && bins[lo - 1].len() >= half {
        lo -= 1;
    }
    let mut hi = peak;
    while hi + 1 < b && bins[hi + 1].len() >= half {
        hi += 1;
    }

    let picked: Vec<f64> = (lo..=hi).flat_map(|k| bins[k].iter().copied()).collect();
    Some(picked.iter().sum::<f64>() / picked.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_dominates_ramp() {
        let mut v: Vec<f64> = (0..10).map(|i| i as f64 * 0.09).collect();
        v.extend(std::iter::repeat(0.9).take(40));
        v.extend((0..10).map(|i| 0.9 - i as f64 * 0.09));
        let f = top_bin(&v, 0.02).unwrap();
        assert!((f - 0.9).abs() < 0.02, "{}", f);
    }

    #[test]
    fn test_largest_run_wins() {
        let mut v = vec![0.3; 5];
        v.extend(vec![0.75; 8]);
        v.extend(vec![0.8; 8]);
        let f = top_bin(&v, 0.0).unwrap();
        assert!((f - 0.775).abs() < 1e-9, "{}", f);
    }

    #[test]
    fn test_empty_or_floored() {
        assert!(top_bin(&[], 0.0).is_none());
        assert!(top_bin(&[0.0, 0.01], 0.02).is_none());
        assert_eq!(top_bin(&[0.0, 0.0], -1.0), Some(0.0));
    }
}
