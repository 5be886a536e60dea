//! Cluster-quality metric reported alongside `/stats` and `/graph`.
//!
//! Grounded on `examples/original_source/backend/main.py::calculate_entropy`:
//! a cosine silhouette score over the current embedding/cluster-label set,
//! folded into `entropy`/`cohesion`/`separation`. The source returns two
//! distinct degenerate tuples: `{0.0, 1.0, 0.0}` for fewer than 2 documents
//! total, and `{0.5, 0.5, 0.0}` for fewer than 2 distinct cluster labels
//! (or a `silhouette_score` exception) — both are reproduced here rather
//! than collapsed into one (SPEC_FULL.md §9).

use std::collections::HashMap;

use crate::embedder::cosine_distance;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EntropyMetrics {
    pub entropy: f32,
    pub cohesion: f32,
    pub separation: f32,
}

/// Returned when there are fewer than 2 documents to compare at all.
const TOO_FEW_DOCUMENTS: EntropyMetrics = EntropyMetrics {
    entropy: 0.0,
    cohesion: 1.0,
    separation: 0.0,
};

/// Returned when there are at least 2 documents but fewer than 2 distinct
/// cluster labels among them (silhouette is undefined with one cluster).
const TOO_FEW_CLUSTERS: EntropyMetrics = EntropyMetrics {
    entropy: 0.5,
    cohesion: 0.5,
    separation: 0.0,
};

/// Computes the silhouette-derived entropy metrics over `embeddings` with
/// `labels` (same key set, cluster id per path). Returns a degenerate tuple
/// unless there are at least 2 points and at least 2 distinct labels.
pub fn calculate_entropy(embeddings: &HashMap<String, Vec<f32>>, labels: &HashMap<String, i64>) -> EntropyMetrics {
    if embeddings.len() < 2 {
        return TOO_FEW_DOCUMENTS;
    }

    let paths: Vec<&String> = embeddings.keys().collect();
    let distinct: std::collections::HashSet<i64> = paths
        .iter()
        .filter_map(|p| labels.get(*p).copied())
        .collect();
    if distinct.len() < 2 {
        return TOO_FEW_CLUSTERS;
    }

    let s = silhouette_score(&paths, embeddings, labels);

    EntropyMetrics {
        entropy: ((1.0 - s) / 2.0).clamp(0.0, 1.0),
        cohesion: (s + 1.0) / 2.0,
        separation: s.abs(),
    }
}

/// Mean silhouette coefficient under cosine distance.
fn silhouette_score(paths: &[&String], embeddings: &HashMap<String, Vec<f32>>, labels: &HashMap<String, i64>) -> f32 {
    let n = paths.len();
    let mut total = 0.0f32;
    let mut counted = 0usize;

    for i in 0..n {
        let label_i = labels.get(paths[i]).copied().unwrap_or(-1);
        let mut same_cluster_dists = Vec::new();
        let mut other_clusters: HashMap<i64, Vec<f32>> = HashMap::new();

        for j in 0..n {
            if i == j {
                continue;
            }
            let label_j = labels.get(paths[j]).copied().unwrap_or(-1);
            let d = cosine_distance(&embeddings[paths[i]], &embeddings[paths[j]]);
            if label_j == label_i {
                same_cluster_dists.push(d);
            } else {
                other_clusters.entry(label_j).or_default().push(d);
            }
        }

        if same_cluster_dists.is_empty() {
            continue;
        }

        let a = same_cluster_dists.iter().sum::<f32>() / same_cluster_dists.len() as f32;
        let b = other_clusters
            .values()
            .map(|dists| dists.iter().sum::<f32>() / dists.len() as f32)
            .fold(f32::MAX, f32::min);

        if b == f32::MAX {
            continue;
        }

        let s_i = (b - a) / a.max(b).max(f32::EPSILON);
        total += s_i;
        counted += 1;
    }

    if counted == 0 {
        0.0
    } else {
        total / counted as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_points_is_degenerate() {
        let mut embeddings = HashMap::new();
        embeddings.insert("a.txt".to_string(), vec![1.0, 0.0]);
        let labels = HashMap::new();
        let m = calculate_entropy(&embeddings, &labels);
        assert_eq!(m.entropy, 0.0);
        assert_eq!(m.cohesion, 1.0);
        assert_eq!(m.separation, 0.0);
    }

    #[test]
    fn single_distinct_label_is_degenerate() {
        let mut embeddings = HashMap::new();
        embeddings.insert("a.txt".to_string(), vec![1.0, 0.0]);
        embeddings.insert("b.txt".to_string(), vec![0.9, 0.1]);
        let mut labels = HashMap::new();
        labels.insert("a.txt".to_string(), 0);
        labels.insert("b.txt".to_string(), 0);
        let m = calculate_entropy(&embeddings, &labels);
        assert_eq!(m.entropy, 0.5);
    }

    #[test]
    fn well_separated_clusters_have_high_cohesion() {
        let mut embeddings = HashMap::new();
        embeddings.insert("a.txt".to_string(), vec![1.0, 0.0]);
        embeddings.insert("b.txt".to_string(), vec![0.99, 0.01]);
        embeddings.insert("c.txt".to_string(), vec![0.0, 1.0]);
        embeddings.insert("d.txt".to_string(), vec![0.01, 0.99]);
        let mut labels = HashMap::new();
        labels.insert("a.txt".to_string(), 0);
        labels.insert("b.txt".to_string(), 0);
        labels.insert("c.txt".to_string(), 1);
        labels.insert("d.txt".to_string(), 1);
        let m = calculate_entropy(&embeddings, &labels);
        assert!(m.cohesion > 0.5);
    }
}
