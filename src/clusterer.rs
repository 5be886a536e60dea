//! Groups documents by semantic proximity and labels each group.
//!
//! Grounded on `examples/original_source/backend/analyzer.py::cluster_files_with_topics`:
//! DBSCAN-equivalent density clustering under cosine distance, then a
//! keyphrase-labeling pass over up to the first 3 member texts per cluster.
//! Cluster-ID stability via centroid memory is this implementation's
//! resolution of the Open Question recorded in SPEC_FULL.md §9.

use std::collections::HashMap;

use crate::embedder::cosine_distance;
use crate::keyphrase::extract_topic_label;

pub const NOISE_CLUSTER_ID: i64 = -1;
const CENTROID_MATCH_THRESHOLD: f32 = 0.85;
const CONTEXT_DOCS_PER_CLUSTER: usize = 3;

#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub cluster_id: i64,
    pub topic_label: String,
}

/// Remembers each cluster's centroid across reclusterings so the same
/// semantic group keeps the same folder name even though DBSCAN itself mints
/// fresh labels on every call.
#[derive(Default)]
pub struct Clusterer {
    centroids: HashMap<i64, (String, Vec<f32>)>,
    next_id: i64,
}

impl Clusterer {
    pub fn new() -> Self {
        Self {
            centroids: HashMap::new(),
            next_id: 0,
        }
    }

    /// Clusters `embeddings` (keyed by path) with their matching `contents`,
    /// returning a `(cluster_id, topic_label)` per path. Noise points get
    /// `(-1, "Uncategorized")`.
    pub fn cluster(
        &mut self,
        embeddings: &HashMap<String, Vec<f32>>,
        contents: &HashMap<String, String>,
        eps: f32,
        min_samples: usize,
    ) -> HashMap<String, ClusterAssignment> {
        if embeddings.is_empty() {
            return HashMap::new();
        }

        let paths: Vec<&String> = embeddings.keys().collect();
        let vectors: Vec<&Vec<f32>> = paths.iter().map(|p| &embeddings[*p]).collect();

        let labels = dbscan(&vectors, eps, min_samples);

        let mut by_label: HashMap<i64, Vec<usize>> = HashMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            by_label.entry(label).or_default().push(idx);
        }

        let mut result = HashMap::new();
        for (&raw_label, members) in &by_label {
            if raw_label == NOISE_CLUSTER_ID {
                for &idx in members {
                    result.insert(
                        paths[idx].clone(),
                        ClusterAssignment {
                            cluster_id: NOISE_CLUSTER_ID,
                            topic_label: "Uncategorized".to_string(),
                        },
                    );
                }
                continue;
            }

            let member_texts: Vec<&str> = members
                .iter()
                .take(CONTEXT_DOCS_PER_CLUSTER)
                .filter_map(|&idx| contents.get(paths[idx]).map(|s| s.as_str()))
                .filter(|t| !t.trim().is_empty())
                .collect();

            let topic_label = if member_texts.is_empty() {
                "Misc".to_string()
            } else {
                extract_topic_label(&member_texts)
            };

            let centroid = mean_vector(members.iter().map(|&idx| vectors[idx]));
            let cluster_id = self.stable_cluster_id(&topic_label, &centroid);

            for &idx in members {
                result.insert(
                    paths[idx].clone(),
                    ClusterAssignment {
                        cluster_id,
                        topic_label: topic_label.clone(),
                    },
                );
            }
        }

        result
    }

    /// Matches `centroid` against previously remembered centroids by nearest
    /// cosine similarity; reuses that cluster's ID above the match threshold,
    /// otherwise mints a fresh one.
    fn stable_cluster_id(&mut self, topic_label: &str, centroid: &[f32]) -> i64 {
        let best = self
            .centroids
            .iter()
            .map(|(&id, (_, c))| (id, 1.0 - cosine_distance(c, centroid)))
            .filter(|(_, sim)| *sim >= CENTROID_MATCH_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let id = match best {
            Some((id, _)) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        self.centroids.insert(id, (topic_label.to_string(), centroid.to_vec()));
        id
    }
}

fn mean_vector<'a>(vectors: impl Iterator<Item = &'a Vec<f32>>) -> Vec<f32> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0usize;
    for v in vectors {
        if sum.is_empty() {
            sum = vec![0.0; v.len()];
        }
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x;
        }
        count += 1;
    }
    if count > 0 {
        for s in sum.iter_mut() {
            *s /= count as f32;
        }
    }
    sum
}

/// DBSCAN under cosine distance. Returns a label per input vector; `-1`
/// marks noise. A point with fewer than `min_samples` neighbors (including
/// itself) within `eps` is noise unless reached from a core point's cluster.
fn dbscan(vectors: &[&Vec<f32>], eps: f32, min_samples: usize) -> Vec<i64> {
    let n = vectors.len();
    let mut labels = vec![NOISE_CLUSTER_ID; n];
    let mut visited = vec![false; n];
    let mut next_label = 0i64;

    let neighbors = |idx: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != idx && cosine_distance(vectors[idx], vectors[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut neigh = neighbors(i);
        if neigh.len() + 1 < min_samples {
            continue;
        }

        let cluster_label = next_label;
        next_label += 1;
        labels[i] = cluster_label;

        let mut seeds = std::collections::VecDeque::from(neigh.clone());
        neigh.clear();
        while let Some(j) = seeds.pop_front() {
            if !visited[j] {
                visited[j] = true;
                let j_neighbors = neighbors(j);
                if j_neighbors.len() + 1 >= min_samples {
                    for &k in &j_neighbors {
                        seeds.push_back(k);
                    }
                }
            }
            if labels[j] == NOISE_CLUSTER_ID {
                labels[j] = cluster_label;
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_result() {
        let mut c = Clusterer::new();
        let result = c.cluster(&HashMap::new(), &HashMap::new(), 0.6, 1);
        assert!(result.is_empty());
    }

    #[test]
    fn two_tight_points_form_one_cluster() {
        let labels = dbscan(&[&vec![1.0, 0.0], &vec![0.99, 0.01]], 0.1, 1);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], NOISE_CLUSTER_ID);
    }

    #[test]
    fn distant_points_are_separate_clusters() {
        let labels = dbscan(&[&vec![1.0, 0.0], &vec![0.0, 1.0]], 0.1, 1);
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn same_topic_across_reclusterings_keeps_cluster_id() {
        let mut c = Clusterer::new();
        let mut embeddings = HashMap::new();
        embeddings.insert("a.txt".to_string(), vec![1.0, 0.0, 0.0]);
        embeddings.insert("b.txt".to_string(), vec![0.99, 0.01, 0.0]);
        let mut contents = HashMap::new();
        contents.insert("a.txt".to_string(), "quantum entanglement".to_string());
        contents.insert("b.txt".to_string(), "quantum tunneling".to_string());

        let first = c.cluster(&embeddings, &contents, 0.3, 1);
        let second = c.cluster(&embeddings, &contents, 0.3, 1);

        assert_eq!(first["a.txt"].cluster_id, second["a.txt"].cluster_id);
    }
}
