use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;

use crate::fingerprint::Fingerprint;

/// Parameters of the mismatch-penalized distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceParams {
    /// Cost of a token present on one side only.
    pub mismatch_penalty: f64,
    /// Exponent p of the p-norm.
    pub exponent: f64,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            mismatch_penalty: 10.0,
            exponent: 3.0,
        }
    }
}

impl DistanceParams {
    /// Contribution of one token given its value on each side.
    fn term(&self, a: f64, b: f64) -> f64 {
        match (a > 0.0, b > 0.0) {
            (true, true) => (a.max(b) / a.min(b) - 1.0).powf(self.exponent),
            (false, false) => 0.0,
            _ => self.mismatch_penalty.powf(self.exponent),
        }
    }

    fn finish(&self, sum: f64) -> f64 {
        if self.exponent == 3.0 {
            sum.cbrt()
        } else {
            sum.powf(1.0 / self.exponent)
        }
    }
}

/// Distance between two sparse fingerprints over the union of their tokens.
pub fn distance(a: &Fingerprint, b: &Fingerprint, params: &DistanceParams) -> f64 {
    let tokens: HashSet<u32> = a.iter().chain(b.iter()).map(|(t, _)| t).collect();
    let sum: f64 = tokens.into_iter().map(|t| params.term(a.get(t), b.get(t))).sum();
    params.finish(sum)
}

/// One corpus row and its distance to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub row: usize,
    pub distance: f64,
}

/// A match selected for output, with its place in the merged list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedMatch {
    /// 1-based position in the merged selection.
    pub rank: usize,
    pub id: String,
    pub distance: f64,
    pub transpose: i8,
}

/// Corpus fingerprints embedded in a dense matrix over the sorted union of
/// their tokens. Built once, then shared read-only by every query.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    ids: Vec<String>,
    vocabulary: Vec<u32>,
    /// Row-major, `ids.len()` rows of `vocabulary.len()` columns.
    matrix: Vec<f64>,
}

impl CorpusIndex {
    pub fn build(entries: &[(String, Fingerprint)]) -> Self {
        let mut vocabulary: Vec<u32> = entries
            .iter()
            .flat_map(|(_, fp)| fp.iter().map(|(t, _)| t))
            .collect();
        vocabulary.sort_unstable();
        vocabulary.dedup();

        let width = vocabulary.len();
        let mut matrix = vec![0.0_f64; entries.len() * width];
        for (row, (_, fp)) in entries.iter().enumerate() {
            let cells = &mut matrix[row * width..(row + 1) * width];
            for (token, value) in fp.iter() {
                if let Ok(col) = vocabulary.binary_search(&token) {
                    cells[col] = value;
                }
            }
        }

        log::debug!(
            "Corpus index: {} rows over {} tokens",
            entries.len(),
            width
        );

        Self {
            ids: entries.iter().map(|(id, _)| id.clone()).collect(),
            vocabulary,
            matrix,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, row: usize) -> &str {
        &self.ids[row]
    }

    pub fn vocabulary(&self) -> &[u32] {
        &self.vocabulary
    }

    fn row(&self, row: usize) -> &[f64] {
        let width = self.vocabulary.len();
        &self.matrix[row * width..(row + 1) * width]
    }

    /// Project a query onto the vocabulary. Returns the dense vector and the
    /// number of query tokens the corpus never uses.
    fn embed(&self, query: &Fingerprint) -> (Vec<f64>, usize) {
        let mut dense = vec![0.0_f64; self.vocabulary.len()];
        let mut unknown = 0;
        for (token, value) in query.iter() {
            match self.vocabulary.binary_search(&token) {
                Ok(col) => dense[col] = value,
                Err(_) if value > 0.0 => unknown += 1,
                Err(_) => {}
            }
        }
        (dense, unknown)
    }

    /// Distance from the query to every row, in row order.
    pub fn distances(&self, query: &Fingerprint, params: &DistanceParams) -> Vec<f64> {
        let (dense, unknown) = self.embed(query);
        let base = unknown as f64 * params.mismatch_penalty.powf(params.exponent);

        (0..self.len())
            .into_par_iter()
            .map(|row| {
                let sum: f64 = self
                    .row(row)
                    .iter()
                    .zip(&dense)
                    .map(|(&a, &b)| params.term(a, b))
                    .sum();
                params.finish(base + sum)
            })
            .collect()
    }

    /// Every row ordered by ascending distance; ties keep row order.
    pub fn rank(&self, query: &Fingerprint, params: &DistanceParams) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .distances(query, params)
            .into_iter()
            .enumerate()
            .map(|(row, distance)| Match { row, distance })
            .collect();
        matches.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        matches
    }

    /// Merge per-transposition rankings into one selection.
    ///
    /// Each ranking contributes its first `top_k` entries, in the order the
    /// rankings are given. A candidate whose id or exact distance is already
    /// selected is passed over. `accept` sees each remaining candidate and
    /// may still reject it, in which case neither its id nor its distance is
    /// marked as taken.
    pub fn merge_top_matches(
        &self,
        rankings: &[(i8, Vec<Match>)],
        top_k: usize,
        mut accept: impl FnMut(&SelectedMatch) -> bool,
    ) -> Vec<SelectedMatch> {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_distances: HashSet<u64> = HashSet::new();
        let mut selected = Vec::new();

        for (transpose, matches) in rankings {
            for m in matches.iter().take(top_k) {
                let id = self.id(m.row);
                if seen_ids.contains(id) || seen_distances.contains(&m.distance.to_bits()) {
                    continue;
                }
                let candidate = SelectedMatch {
                    rank: selected.len() + 1,
                    id: id.to_string(),
                    distance: m.distance,
                    transpose: *transpose,
                };
                if !accept(&candidate) {
                    continue;
                }
                seen_ids.insert(id);
                seen_distances.insert(m.distance.to_bits());
                selected.push(candidate);
            }
        }

        selected
    }
}
