//! Random bipartite connectivity between input and output feature maps
//!
//! Sparse convolution connects each output feature map to a subset of the
//! input feature maps. The generator places exactly `edge_count` connections
//! while keeping every node's degree close to the uniform share
//! `ceil(edge_count / node_count)`.
//!
//! Edges are placed one by one through three tiers of random search:
//!
//! 1. the output under a round-robin cursor paired with a random input, both
//!    below their strict caps;
//! 2. both endpoints random, below their strict caps;
//! 3. both endpoints random, below the overflow caps (about 1% above strict).
//!
//! When the random draws all miss, every pair of the overflow pools is scanned
//! and a free one is picked at random. If there is none the whole attempt is
//! discarded and restarted with both caps raised by one (the margin). Caps
//! never exceed the node count of the opposite side, so a node that is
//! connected to everything always leaves its pools; once the margin lifts both
//! caps to that bound a free pair exists for every remaining edge. The result
//! is random by nature; only the edge count and the final caps are guaranteed.

use crate::config::ConnectivityConfig;
use crate::error::{LayerError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Dense adjacency matrix between outputs and inputs plus its compressed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityPattern {
    output_count: usize,
    input_count: usize,
    matrix: Vec<bool>,
    column_indices: Vec<u32>,
    row_offsets: Vec<u32>,
    margin: usize,
    output_degree_cap: usize,
    input_degree_cap: usize,
}

impl ConnectivityPattern {
    /// Builds a pattern from a row-major `output_count × input_count` matrix.
    ///
    /// The degree caps are set to the largest degrees present.
    pub fn from_matrix(output_count: usize, input_count: usize, matrix: Vec<bool>) -> Result<Self> {
        if matrix.len() != output_count * input_count {
            return Err(LayerError::InvariantViolation(format!(
                "connection matrix has {} cells, expected {}x{}",
                matrix.len(),
                output_count,
                input_count
            )));
        }
        let mut pattern = Self::compress(output_count, input_count, matrix, 0, 0, 0);
        pattern.output_degree_cap = (0..output_count)
            .map(|o| pattern.output_degree(o))
            .max()
            .unwrap_or(0);
        pattern.input_degree_cap = (0..input_count)
            .map(|i| pattern.input_degree(i))
            .max()
            .unwrap_or(0);
        Ok(pattern)
    }

    fn compress(
        output_count: usize,
        input_count: usize,
        matrix: Vec<bool>,
        margin: usize,
        output_degree_cap: usize,
        input_degree_cap: usize,
    ) -> Self {
        let mut column_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(output_count + 1);
        for row in matrix.chunks(input_count.max(1)).take(output_count) {
            row_offsets.push(column_indices.len() as u32);
            column_indices.extend(
                row.iter()
                    .enumerate()
                    .filter(|&(_, &connected)| connected)
                    .map(|(input_id, _)| input_id as u32),
            );
        }
        // Rows are absent entirely when input_count is zero.
        while row_offsets.len() < output_count {
            row_offsets.push(column_indices.len() as u32);
        }
        row_offsets.push(column_indices.len() as u32);

        Self {
            output_count,
            input_count,
            matrix,
            column_indices,
            row_offsets,
            margin,
            output_degree_cap,
            input_degree_cap,
        }
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn edge_count(&self) -> usize {
        self.column_indices.len()
    }

    pub fn is_connected(&self, output_id: usize, input_id: usize) -> bool {
        self.matrix[output_id * self.input_count + input_id]
    }

    /// Row-major adjacency matrix.
    pub fn matrix(&self) -> &[bool] {
        &self.matrix
    }

    /// Connected input ids, grouped by output in ascending order.
    pub fn column_indices(&self) -> &[u32] {
        &self.column_indices
    }

    /// `output_count + 1` offsets delimiting each output's run in `column_indices`.
    pub fn row_offsets(&self) -> &[u32] {
        &self.row_offsets
    }

    pub fn connected_inputs(&self, output_id: usize) -> &[u32] {
        let start = self.row_offsets[output_id] as usize;
        let end = self.row_offsets[output_id + 1] as usize;
        &self.column_indices[start..end]
    }

    pub fn output_degree(&self, output_id: usize) -> usize {
        (self.row_offsets[output_id + 1] - self.row_offsets[output_id]) as usize
    }

    pub fn input_degree(&self, input_id: usize) -> usize {
        (0..self.output_count)
            .filter(|&o| self.is_connected(o, input_id))
            .count()
    }

    /// Margin of the successful generation attempt.
    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Upper bound on any output's degree under the final margin.
    pub fn output_degree_cap(&self) -> usize {
        self.output_degree_cap
    }

    /// Upper bound on any input's degree under the final margin.
    pub fn input_degree_cap(&self) -> usize {
        self.input_degree_cap
    }
}

#[derive(Debug, Clone, Copy)]
struct DegreeCaps {
    strict: usize,
    overflow: usize,
}

impl DegreeCaps {
    /// Caps for one side with `node_count` nodes; `peer_count` is the node
    /// count of the other side and bounds both caps.
    fn new(
        edge_count: usize,
        node_count: usize,
        peer_count: usize,
        margin: usize,
        tolerance: f32,
    ) -> Self {
        let strict = edge_count
            .div_ceil(node_count)
            .saturating_add(margin)
            .min(peer_count);
        let tolerant = (strict as f32 * (1.0 + tolerance)) as usize;
        Self {
            strict,
            overflow: tolerant.max(strict + 1).min(peer_count),
        }
    }
}

/// Degree bookkeeping for one side of the bipartite graph.
struct NodeSide {
    caps: DegreeCaps,
    degrees: Vec<usize>,
    available: Vec<usize>,
    available_overflow: Vec<usize>,
}

impl NodeSide {
    fn new(node_count: usize, caps: DegreeCaps) -> Self {
        Self {
            caps,
            degrees: vec![0; node_count],
            available: (0..node_count).collect(),
            available_overflow: (0..node_count).collect(),
        }
    }

    /// Records a new edge at `node`; returns true when the node just reached
    /// its strict cap and left the strict pool.
    ///
    /// Both caps can be equal once clamped, in which case the node leaves
    /// both pools at once.
    fn connect(&mut self, node: usize) -> bool {
        self.degrees[node] += 1;
        let degree = self.degrees[node];
        if degree == self.caps.overflow {
            remove_node(&mut self.available_overflow, node);
        }
        if degree == self.caps.strict {
            remove_node(&mut self.available, node);
            return true;
        }
        false
    }
}

fn remove_node(pool: &mut Vec<usize>, node: usize) {
    if let Some(position) = pool.iter().position(|&n| n == node) {
        pool.remove(position);
    }
}

/// Draws up to `attempts` pairs and returns the first unconnected one.
///
/// With a cursor the output is fixed to `output_pool[cursor]`.
fn find_free_pair<R: Rng + ?Sized>(
    rng: &mut R,
    attempts: usize,
    matrix: &[bool],
    input_count: usize,
    output_pool: &[usize],
    input_pool: &[usize],
    cursor: Option<usize>,
) -> Option<(usize, usize)> {
    for _ in 0..attempts {
        let output_id = match cursor {
            Some(index) => *output_pool.get(index)?,
            None => *output_pool.choose(rng)?,
        };
        let input_id = *input_pool.choose(rng)?;
        if !matrix[output_id * input_count + input_id] {
            return Some((output_id, input_id));
        }
    }
    None
}

/// Picks a random unconnected pair among all combinations of the two pools.
fn scan_free_pair<R: Rng + ?Sized>(
    rng: &mut R,
    matrix: &[bool],
    input_count: usize,
    output_pool: &[usize],
    input_pool: &[usize],
) -> Option<(usize, usize)> {
    let free_pairs: Vec<(usize, usize)> = output_pool
        .iter()
        .flat_map(|&output_id| input_pool.iter().map(move |&input_id| (output_id, input_id)))
        .filter(|&(output_id, input_id)| !matrix[output_id * input_count + input_id])
        .collect();
    free_pairs.choose(rng).copied()
}

struct Placement {
    matrix: Vec<bool>,
    output_caps: DegreeCaps,
    input_caps: DegreeCaps,
}

/// One generation attempt at a fixed margin; `None` when some edge could not
/// be placed by any tier.
fn place_edges<R: Rng + ?Sized>(
    rng: &mut R,
    output_count: usize,
    input_count: usize,
    edge_count: usize,
    margin: usize,
    config: &ConnectivityConfig,
) -> Option<Placement> {
    let tolerance = config.overflow_tolerance;
    let mut outputs = NodeSide::new(
        output_count,
        DegreeCaps::new(edge_count, output_count, input_count, margin, tolerance),
    );
    let mut inputs = NodeSide::new(
        input_count,
        DegreeCaps::new(edge_count, input_count, output_count, margin, tolerance),
    );
    let mut matrix = vec![false; output_count * input_count];

    let mut explore_strict = true;
    let mut cursor = 0usize;
    for _ in 0..edge_count {
        let mut found = None;
        if explore_strict {
            found = find_free_pair(
                rng,
                config.cursor_attempts,
                &matrix,
                input_count,
                &outputs.available,
                &inputs.available,
                Some(cursor),
            )
            .or_else(|| {
                find_free_pair(
                    rng,
                    config.random_attempts,
                    &matrix,
                    input_count,
                    &outputs.available,
                    &inputs.available,
                    None,
                )
            });
            explore_strict = found.is_some();
        }
        if found.is_none() {
            found = find_free_pair(
                rng,
                config.overflow_attempts,
                &matrix,
                input_count,
                &outputs.available_overflow,
                &inputs.available_overflow,
                None,
            )
            .or_else(|| {
                scan_free_pair(
                    rng,
                    &matrix,
                    input_count,
                    &outputs.available_overflow,
                    &inputs.available_overflow,
                )
            });
        }

        let (output_id, input_id) = found?;
        matrix[output_id * input_count + input_id] = true;

        if !outputs.connect(output_id) {
            cursor += 1;
        }
        inputs.connect(input_id);

        if !outputs.available.is_empty() {
            cursor %= outputs.available.len();
        }
        if explore_strict {
            explore_strict = !outputs.available.is_empty() && !inputs.available.is_empty();
        }
    }

    Some(Placement {
        matrix,
        output_caps: outputs.caps,
        input_caps: inputs.caps,
    })
}

/// Generates a random connectivity pattern with exactly `edge_count` edges.
///
/// Every output ends with at most `ceil(edge_count / output_count) + margin`
/// connections up to the overflow tolerance, and likewise for inputs; the
/// margin is the number of failed attempts before the successful one. No cap
/// exceeds the node count of the other side, so at most `max(output_count,
/// input_count)` relaxations are ever needed.
///
/// # Errors
///
/// Returns `InvariantViolation` when `edge_count` exceeds the dense count or
/// when `config.max_relaxations` attempts all fail.
///
/// # Example
///
/// ```
/// use nn_layer_forge::config::ConnectivityConfig;
/// use nn_layer_forge::layers::connectivity::generate;
/// use nn_layer_forge::utils::rng::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let pattern = generate(&mut rng, 6, 4, 12, &ConnectivityConfig::default()).unwrap();
/// assert_eq!(pattern.edge_count(), 12);
/// assert_eq!(pattern.row_offsets().len(), 7);
/// ```
pub fn generate<R: Rng + ?Sized>(
    rng: &mut R,
    output_count: usize,
    input_count: usize,
    edge_count: usize,
    config: &ConnectivityConfig,
) -> Result<ConnectivityPattern> {
    let dense_count = output_count.checked_mul(input_count).ok_or_else(|| {
        LayerError::InvariantViolation(format!(
            "connection matrix of {} outputs and {} inputs is too large",
            output_count, input_count
        ))
    })?;
    if edge_count > dense_count {
        return Err(LayerError::InvariantViolation(format!(
            "cannot place {} connections between {} outputs and {} inputs",
            edge_count, output_count, input_count
        )));
    }
    if edge_count == 0 {
        return ConnectivityPattern::from_matrix(
            output_count,
            input_count,
            vec![false; dense_count],
        );
    }

    for margin in 0..config.max_relaxations {
        match place_edges(rng, output_count, input_count, edge_count, margin, config) {
            Some(placement) => {
                debug!(
                    output_count,
                    input_count,
                    edge_count,
                    margin,
                    "connectivity pattern generated"
                );
                return Ok(ConnectivityPattern::compress(
                    output_count,
                    input_count,
                    placement.matrix,
                    margin,
                    placement.output_caps.overflow,
                    placement.input_caps.overflow,
                ));
            }
            None => debug!(margin, edge_count, "relaxing connectivity degree caps"),
        }
    }

    Err(LayerError::InvariantViolation(format!(
        "connectivity generation for {} connections between {} outputs and {} inputs did not converge after {} relaxations",
        edge_count, output_count, input_count, config.max_relaxations
    )))
}
