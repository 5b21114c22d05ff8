/// Indices of local maxima: values above `floor` that are >= every neighbour
/// within `order` samples. Plateaus and near-duplicate peaks closer than
/// `order` collapse into their middle index.
pub fn local_maxima(series: &[f64], order: usize, floor: f64) -> Vec<usize> {
    let n = series.len();
    if n == 0 || order == 0 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for i in 0..n {
        let v = series[i];
        if !(v > floor) {
            continue;
        }
        let from = i.saturating_sub(order);
        let to = (i + order + 1).min(n);
        // v must be the window maximum
        if series[from..to].iter().all(|x| *x <= v) {
            candidates.push(i);
        }
    }
    collapse(&candidates, order)
}

/// Indices of local minima whose window maximum is at least `prominence`
/// above them.
pub fn local_minima(series: &[f64], order: usize, prominence: f64) -> Vec<usize> {
    let n = series.len();
    if n == 0 || order == 0 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for i in 0..n {
        let v = series[i];
        let from = i.saturating_sub(order);
        let to = (i + order + 1).min(n);
        let window = &series[from..to];
        if !window.iter().all(|x| *x >= v) {
            continue;
        }
        let top = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if top - v >= prominence {
            candidates.push(i);
        }
    }
    collapse(&candidates, order)
}

fn collapse(candidates: &[usize], order: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(candidates.len());
    let mut group: Vec<usize> = Vec::new();
    for &i in candidates {
        if let Some(&last) = group.last() {
            if i - last > order {
                out.push(group[group.len() / 2]);
                group.clear();
            }
        }
        group.push(i);
    }
    if !group.is_empty() {
        out.push(group[group.len() / 2]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_collapses_to_middle() {
        let mut s = vec![0.0; 300];
        for v in s.iter_mut().take(151).skip(100) {
            *v = 0.9;
        }
        let peaks = local_maxima(&s, 50, 0.1);
        assert_eq!(peaks, vec![125]);
    }

    #[test]
    fn test_floor_filters_noise() {
        let mut s = vec![0.0; 300];
        s[40] = 0.05;
        s[200] = 0.6;
        assert_eq!(local_maxima(&s, 50, 0.1), vec![200]);
    }

    #[test]
    fn test_minima_need_prominence() {
        let mut s: Vec<f64> = (0..400).map(|i| 60.0 + ((i % 7) as f64) * 0.1).collect();
        for (i, v) in s.iter_mut().enumerate().take(230).skip(170) {
            *v = 60.0 - 30.0 * (1.0 - ((i as f64 - 200.0) / 30.0).abs());
        }
        let mins = local_minima(&s, 50, 3.0);
        assert_eq!(mins, vec![200]);
    }

    #[test]
    fn test_distinct_peaks_are_kept() {
        let mut s = vec![0.0; 600];
        s[100] = 1.0;
        s[400] = 0.8;
        assert_eq!(local_maxima(&s, 50, 0.1), vec![100, 400]);
    }
}
