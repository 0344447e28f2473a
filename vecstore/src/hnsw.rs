use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cosine::cosine_distance;
use crate::error::VecError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// HnswConfig configures how a graph is built and searched.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswConfig {
    /// Vector dimension. Required; must be positive.
    pub dim: usize,
    /// Max connections per node per layer (except layer 0 which allows 2*M).
    /// Default: 16.
    pub m: usize,
    /// Size of the dynamic candidate list during graph construction.
    /// Default: 200.
    pub ef_construction: usize,
    /// Default size of the dynamic candidate list during search.
    /// Default: 50.
    pub ef_search: usize,
    /// Seed for level assignment. Equal seeds over equal input produce
    /// identical graphs.
    pub seed: u64,
}

impl HnswConfig {
    pub fn new(dim: usize) -> Self {
        let mut cfg = Self {
            dim,
            m: 0,
            ef_construction: 0,
            ef_search: 0,
            seed: 0,
        };
        cfg.set_defaults();
        cfg
    }

    pub(crate) fn set_defaults(&mut self) {
        if self.m < 2 {
            self.m = 16;
        }
        if self.ef_construction == 0 {
            self.ef_construction = 200;
        }
        if self.ef_search == 0 {
            self.ef_search = 50;
        }
    }

    fn max_conns(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}

// ---------------------------------------------------------------------------
// Internal priority-queue types
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct DistItem {
    id: u32,
    dist: f32,
}

/// Min-heap: closest first.
impl Ord for DistItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for DistItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for DistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}
impl Eq for DistItem {}

/// Reversed for max-heap usage: farthest first.
#[derive(Clone)]
struct MaxDistItem {
    id: u32,
    dist: f32,
}

impl Ord for MaxDistItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}
impl PartialOrd for MaxDistItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for MaxDistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}
impl Eq for MaxDistItem {}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub(crate) struct HnswNode {
    pub(crate) vector: Vec<f32>,
    pub(crate) level: usize,
    pub(crate) friends: Vec<Vec<u32>>, // friends[layer] = neighbor node IDs
}

/// A single result from [`Hnsw::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Node ID, equal to the position of the vector passed to [`Hnsw::build`].
    pub id: u32,
    /// Cosine distance to the query. Lower is closer.
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Graph traversal shared by construction and search
// ---------------------------------------------------------------------------

fn search_layer(
    nodes: &[HnswNode],
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
) -> Vec<u32> {
    let mut visited = HashSet::with_capacity(ef * 2);
    let mut candidates: BinaryHeap<DistItem> = BinaryHeap::new();
    let mut results: BinaryHeap<MaxDistItem> = BinaryHeap::new();

    for &ep in entry_points {
        if visited.insert(ep) {
            let d = cosine_distance(query, &nodes[ep as usize].vector);
            candidates.push(DistItem { id: ep, dist: d });
            results.push(MaxDistItem { id: ep, dist: d });
        }
    }

    while let Some(closest) = candidates.pop() {
        if results.len() >= ef {
            if let Some(farthest) = results.peek() {
                if closest.dist > farthest.dist {
                    break;
                }
            }
        }

        let nd = &nodes[closest.id as usize];
        if layer >= nd.friends.len() {
            continue;
        }
        for &f_id in &nd.friends[layer] {
            if !visited.insert(f_id) {
                continue;
            }
            let d = cosine_distance(query, &nodes[f_id as usize].vector);
            let should_add = results.len() < ef || results.peek().is_none_or(|far| d < far.dist);
            if should_add {
                candidates.push(DistItem { id: f_id, dist: d });
                results.push(MaxDistItem { id: f_id, dist: d });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results.into_iter().map(|item| item.id).collect()
}

fn select_closest(nodes: &[HnswNode], query: &[f32], candidates: &[u32], max_n: usize) -> Vec<u32> {
    if candidates.len() <= max_n {
        return candidates.to_vec();
    }

    let mut items: Vec<(u32, f32)> = candidates
        .iter()
        .map(|&c_id| (c_id, cosine_distance(query, &nodes[c_id as usize].vector)))
        .collect();

    items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    items.truncate(max_n);
    items.into_iter().map(|(id, _)| id).collect()
}

/// Greedy walk from `start` through layers `top..=bottom` (descending),
/// returning the closest node found.
fn greedy_descend(nodes: &[HnswNode], query: &[f32], start: u32, top: usize, bottom: usize) -> u32 {
    let mut cur = start;
    let mut cur_dist = cosine_distance(query, &nodes[cur as usize].vector);

    for lev in (bottom..=top).rev() {
        let mut changed = true;
        while changed {
            changed = false;
            let cur_node = &nodes[cur as usize];
            if lev >= cur_node.friends.len() {
                break;
            }
            for &f_id in &cur_node.friends[lev] {
                let d = cosine_distance(query, &nodes[f_id as usize].vector);
                if d < cur_dist {
                    cur = f_id;
                    cur_dist = d;
                    changed = true;
                }
            }
        }
    }
    cur
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Builder {
    cfg: HnswConfig,
    nodes: Vec<HnswNode>,
    entry: Option<u32>,
    max_level: usize,
    level_mul: f64,
    rng: StdRng,
}

impl Builder {
    fn new(cfg: HnswConfig, capacity: usize) -> Self {
        let level_mul = 1.0 / (cfg.m as f64).ln();
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            nodes: Vec::with_capacity(capacity),
            entry: None,
            max_level: 0,
            level_mul,
            rng,
        }
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * self.level_mul) as usize;
        level.min(31)
    }

    fn insert(&mut self, vector: Vec<f32>) {
        let idx = self.nodes.len() as u32;
        let level = self.random_level();
        self.nodes.push(HnswNode {
            vector,
            level,
            friends: vec![Vec::new(); level + 1],
        });

        // First node becomes the entry point.
        let Some(entry) = self.entry else {
            self.entry = Some(idx);
            self.max_level = level;
            return;
        };

        let query = self.nodes[idx as usize].vector.clone();

        // Phase 1: greedy descent from the top layer to level+1.
        let cur = if level < self.max_level {
            greedy_descend(&self.nodes, &query, entry, self.max_level, level + 1)
        } else {
            entry
        };

        // Phase 2: beam search + connect at each layer.
        let top_insert = level.min(self.max_level);
        let mut ep = vec![cur];
        for lev in (0..=top_insert).rev() {
            let candidates =
                search_layer(&self.nodes, &query, &ep, self.cfg.ef_construction, lev);
            let max_c = self.cfg.max_conns(lev);
            let neighbors = select_closest(&self.nodes, &query, &candidates, max_c);

            self.nodes[idx as usize].friends[lev] = neighbors.clone();

            // Bidirectional connections + pruning.
            for &n_id in &neighbors {
                let needs_prune = {
                    let nn = &mut self.nodes[n_id as usize];
                    if lev < nn.friends.len() {
                        nn.friends[lev].push(idx);
                        nn.friends[lev].len() > max_c
                    } else {
                        false
                    }
                };
                if needs_prune {
                    let nn = &self.nodes[n_id as usize];
                    let pruned = select_closest(&self.nodes, &nn.vector, &nn.friends[lev], max_c);
                    self.nodes[n_id as usize].friends[lev] = pruned;
                }
            }

            ep = candidates;
        }

        if level > self.max_level {
            self.entry = Some(idx);
            self.max_level = level;
        }
    }

    fn finish(self) -> Hnsw {
        Hnsw {
            cfg: self.cfg,
            nodes: self.nodes,
            entry: self.entry,
            max_level: self.max_level,
        }
    }
}

// ---------------------------------------------------------------------------
// HNSW
// ---------------------------------------------------------------------------

/// Hnsw is an immutable Hierarchical Navigable Small World graph.
///
/// A graph is built once from a fixed list of vectors and can only be
/// searched afterwards. Node IDs are the positions of the input vectors, so
/// callers can keep their own per-node payload in a parallel array.
/// Being immutable, a built graph is freely shareable between threads.
pub struct Hnsw {
    cfg: HnswConfig,
    nodes: Vec<HnswNode>,
    entry: Option<u32>,
    max_level: usize,
}

impl Hnsw {
    /// Build a graph over `vectors`. Fails if any vector does not have
    /// `cfg.dim` components. Panics if `cfg.dim` is not positive.
    pub fn build(mut cfg: HnswConfig, vectors: Vec<Vec<f32>>) -> Result<Self, VecError> {
        assert!(cfg.dim > 0, "vecstore: HnswConfig.dim must be positive");
        cfg.set_defaults();

        if let Some(bad) = vectors.iter().find(|v| v.len() != cfg.dim) {
            return Err(VecError::DimensionMismatch {
                got: bad.len(),
                want: cfg.dim,
            });
        }

        let mut builder = Builder::new(cfg, vectors.len());
        for v in vectors {
            builder.insert(v);
        }
        Ok(builder.finish())
    }

    /// An empty graph; every search returns no results.
    pub fn empty(mut cfg: HnswConfig) -> Self {
        assert!(cfg.dim > 0, "vecstore: HnswConfig.dim must be positive");
        cfg.set_defaults();
        Builder::new(cfg, 0).finish()
    }

    /// Assemble a graph from decoded parts. Derived state (entry point,
    /// max level) is recomputed from the nodes.
    pub(crate) fn from_nodes(cfg: HnswConfig, nodes: Vec<HnswNode>) -> Self {
        let mut entry = None;
        let mut max_level = 0;
        for (i, nd) in nodes.iter().enumerate() {
            if entry.is_none() || nd.level > max_level {
                entry = Some(i as u32);
                max_level = nd.level;
            }
        }
        Self {
            cfg,
            nodes,
            entry,
            max_level,
        }
    }

    pub(crate) fn nodes(&self) -> &[HnswNode] {
        &self.nodes
    }

    pub fn config(&self) -> &HnswConfig {
        &self.cfg
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The vector stored for node `id`.
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        self.nodes.get(id as usize).map(|nd| nd.vector.as_slice())
    }

    /// Return up to `top_k` approximate nearest nodes, ordered by ascending
    /// distance and then ascending node ID.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, VecError> {
        self.search_ef(query, top_k, self.cfg.ef_search)
    }

    /// Like [`Hnsw::search`] with an explicit candidate list size.
    pub fn search_ef(&self, query: &[f32], top_k: usize, ef: usize) -> Result<Vec<Neighbor>, VecError> {
        if query.len() != self.cfg.dim {
            return Err(VecError::DimensionMismatch {
                got: query.len(),
                want: self.cfg.dim,
            });
        }
        let Some(entry) = self.entry else {
            return Ok(vec![]);
        };
        if top_k == 0 {
            return Ok(vec![]);
        }

        let ef = ef.max(top_k);

        // Phase 1: greedy descent to layer 1.
        let cur = if self.max_level >= 1 {
            greedy_descend(&self.nodes, query, entry, self.max_level, 1)
        } else {
            entry
        };

        // Phase 2: beam search at layer 0.
        let candidate_ids = search_layer(&self.nodes, query, &[cur], ef, 0);

        let mut results: Vec<Neighbor> = candidate_ids
            .into_iter()
            .map(|id| Neighbor {
                id,
                distance: cosine_distance(query, &self.nodes[id as usize].vector),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);
        Ok(results)
    }
}
