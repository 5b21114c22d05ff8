//! Deterministic Lloyd k-means on 2-D points `[value, distance]`.

#[derive(Clone, Debug, PartialEq)]
pub struct Clusters {
    pub centroids: Vec<[f64; 2]>,
    pub labels: Vec<usize>,
}

impl Clusters {
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for l in &self.labels {
            sizes[*l] += 1;
        }
        sizes
    }
}

fn dist2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Clusters `points` into at most `k` groups. Seeds are taken at evenly spaced
/// quantiles of the distance coordinate, so the result is reproducible.
pub fn kmeans(points: &[[f64; 2]], k: usize, max_iter: usize) -> Option<Clusters> {
    if points.is_empty() || k == 0 {
        return None;
    }
    let k = k.min(points.len());

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|a, b| points[*a][1].partial_cmp(&points[*b][1]).unwrap_or(std::cmp::Ordering::Equal));
    let mut centroids: Vec<[f64; 2]> = (0..k)
        .map(|i| {
            let q = ((i as f64 + 0.5) / k as f64 * points.len() as f64) as usize;
            points[order[q.min(points.len() - 1)]]
        })
        .collect();

    let mut labels = vec![usize::MAX; points.len()];
    for _ in 0..max_iter.max(1) {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let mut best = 0;
            let mut bd = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = dist2(p, centroid);
                if d < bd {
                    bd = d;
                    best = c;
                }
            }
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![[0.0_f64; 2]; k];
        let mut counts = vec![0usize; k];
        for (p, l) in points.iter().zip(&labels) {
            sums[*l][0] += p[0];
            sums[*l][1] += p[1];
            counts[*l] += 1;
        }
        for c in 0..k {
            // empty clusters keep their previous centroid
            if counts[c] > 0 {
                centroids[c] = [sums[c][0] / counts[c] as f64, sums[c][1] / counts[c] as f64];
            }
        }
    }

    Some(Clusters { centroids, labels })
}
