//! Near-duplicate grouping.
//!
//! Two results describe the same entity when their normalised URLs are
//! identical or their title token sets have a Jaccard similarity of at least
//! [`TITLE_SIMILARITY_THRESHOLD`]. Grouping goes through a union-find so that
//! chains of near-duplicates end up in one group.

use std::collections::{BTreeSet, HashMap};

/// Minimum title Jaccard similarity for two results to merge.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Lower-cased alphanumeric tokens of a title.
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two token sets. Empty sets are never similar.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
    }
}

/// Key material for one result.
#[derive(Debug, Clone)]
pub struct DedupKey {
    pub normalized_url: String,
    pub title_tokens: BTreeSet<String>,
}

/// Partition `keys` into duplicate groups.
///
/// Each group lists member indices in ascending order; groups are ordered by
/// their smallest member. The partition depends only on the keys, never on
/// the order in which pairs are examined.
pub fn group_duplicates(keys: &[DedupKey]) -> Vec<Vec<usize>> {
    let mut sets = UnionFind::new(keys.len());

    let mut by_url: HashMap<&str, usize> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        match by_url.get(key.normalized_url.as_str()) {
            Some(&first) => sets.union(first, i),
            None => {
                by_url.insert(key.normalized_url.as_str(), i);
            }
        }
    }

    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            if jaccard(&keys[i].title_tokens, &keys[j].title_tokens) >= TITLE_SIMILARITY_THRESHOLD {
                sets.union(i, j);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..keys.len() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_by_key(|members| members[0]);
    groups
}
