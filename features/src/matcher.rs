use pano_core::{Descriptor, Descriptors, FeatureMatch, MatchConfig, Matches};
use rayon::prelude::*;

/// Brute-force Hamming matcher.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatchConfig,
}

/// Best and second-best neighbour of one query; ties resolve to the lower index.
#[derive(Debug, Clone, Copy)]
struct Nearest {
    idx: usize,
    distance: u32,
    second: Option<u32>,
}

fn nearest(q: &Descriptor, train: &Descriptors) -> Option<Nearest> {
    let mut best: Option<Nearest> = None;
    for (idx, t) in train.iter().enumerate() {
        let distance = q.hamming_distance(t);
        best = Some(match best {
            None => Nearest {
                idx,
                distance,
                second: None,
            },
            Some(b) if distance < b.distance => Nearest {
                idx,
                distance,
                second: Some(b.distance),
            },
            Some(b) => Nearest {
                second: Some(b.second.map_or(distance, |s| s.min(distance))),
                ..b
            },
        });
    }
    best
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn with_cross_check(mut self, enabled: bool) -> Self {
        self.config.cross_check = enabled;
        self
    }

    pub fn with_ratio_test(mut self, threshold: Option<f32>) -> Self {
        self.config.ratio_threshold = threshold;
        self
    }

    pub fn with_max_distance(mut self, max_distance: Option<u32>) -> Self {
        self.config.max_distance = max_distance;
        self
    }

    /// One candidate per query descriptor (its nearest train descriptor),
    /// filtered by cross-check, ratio and distance policies. The result
    /// follows query index order.
    pub fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        if query.is_empty() || train.is_empty() {
            return Matches::new();
        }

        let forward: Vec<Option<Nearest>> = query
            .descriptors
            .par_iter()
            .map(|q| nearest(q, train))
            .collect();

        let reverse: Option<Vec<Option<usize>>> = self.config.cross_check.then(|| {
            train
                .descriptors
                .par_iter()
                .map(|t| nearest(t, query).map(|n| n.idx))
                .collect()
        });

        let mut matches: Matches = forward
            .into_iter()
            .enumerate()
            .filter_map(|(query_idx, n)| {
                let n = n?;
                if let Some(reverse) = &reverse {
                    if reverse[n.idx] != Some(query_idx) {
                        return None;
                    }
                }
                if let (Some(ratio), Some(second)) = (self.config.ratio_threshold, n.second) {
                    if n.distance as f32 > ratio * second as f32 {
                        return None;
                    }
                }
                Some(FeatureMatch::new(query_idx, n.idx, n.distance as f32))
            })
            .collect();
        if let Some(max_distance) = self.config.max_distance {
            matches.filter_by_distance(max_distance as f32);
        }
        matches
    }
}

pub fn match_descriptors(query: &Descriptors, train: &Descriptors, config: &MatchConfig) -> Matches {
    Matcher::new(config.clone()).match_descriptors(query, train)
}

/// The `k` nearest train descriptors of every query, closest first.
pub fn knn_match(query: &Descriptors, train: &Descriptors, k: usize) -> Vec<Vec<FeatureMatch>> {
    query
        .descriptors
        .par_iter()
        .enumerate()
        .map(|(query_idx, q_desc)| {
            let mut distances: Vec<(usize, u32)> = train
                .iter()
                .enumerate()
                .map(|(idx, t_desc)| (idx, q_desc.hamming_distance(t_desc)))
                .collect();
            distances.sort_by_key(|&(idx, d)| (d, idx));

            distances
                .into_iter()
                .take(k)
                .map(|(train_idx, distance)| FeatureMatch::new(query_idx, train_idx, distance as f32))
                .collect()
        })
        .collect()
}
