use crate::arrays::Volume;
use crate::common::{split_length_to_ranges, Config};
use crate::graph::Edge;
use log::{debug, warn};
use multiversion::multiversion;
use rayon::current_num_threads;
use rayon::prelude::*;
use std::ops::Range;

/// Edge conductances and whether the uniform fallback was used.
#[derive(Debug)]
pub struct EdgeWeights {
    pub weights: Vec<f64>,
    /// Set when the image has zero (or non-finite) variance and every edge got the same weight.
    pub degenerate: bool,
}

/// Conductance for squared gradient `gradient_sq`. `scale` is the negative exponent factor
/// `-beta / (std_scale * stddev)`.
#[inline(always)]
pub fn edge_weight(gradient_sq: f64, scale: f64, eps: f64) -> f64 {
    (scale * gradient_sq).exp() + eps
}

#[multiversion(targets = "simd")]
fn gradients_range(volume: &Volume, edges: &[Edge], out: &mut [f64]) {
    let inv_spacing_sq = volume.spacing.map(|s| 1.0 / (s * s));
    out.fill(0.0);
    for channel in &volume.channels {
        let data = channel.as_slice();
        for (g, edge) in out.iter_mut().zip(edges) {
            let diff = data[edge.b as usize] - data[edge.a as usize];
            *g += diff * diff * inv_spacing_sq[edge.axis as usize];
        }
    }
}

/// Computes one strictly positive weight per edge.
///
/// Squared intensity differences are divided by the squared spacing along the edge axis and summed
/// over channels. The weight is `exp(-beta * g² / (std_scale * stddev)) + eps`.
pub fn compute_weights(volume: &Volume, edges: &[Edge], config: &Config) -> EdgeWeights {
    let std_dev = volume.std_dev();
    let denominator = config.std_scale * std_dev;
    if !(denominator.is_finite() && denominator > 0.0) {
        warn!(
            "intensity standard deviation is {std_dev}, falling back to uniform edge weights"
        );
        return EdgeWeights {
            weights: vec![1.0 + config.eps; edges.len()],
            degenerate: true,
        };
    }
    let scale = -config.beta / denominator;
    debug!("weights: {} edges, stddev {std_dev:.6}, scale {scale:.6}", edges.len());

    let mut weights = vec![0.0; edges.len()];
    let ranges: Vec<Range<usize>> = split_length_to_ranges(edges.len(), current_num_threads());
    let mut chunks: Vec<(&[Edge], &mut [f64])> = Vec::with_capacity(ranges.len());
    let mut rest: &mut [f64] = &mut weights;
    for r in ranges {
        let (chunk, tail) = rest.split_at_mut(r.len());
        rest = tail;
        chunks.push((&edges[r], chunk));
    }
    chunks.into_par_iter().for_each(|(edges, out)| {
        gradients_range(volume, edges, out);
        out.iter_mut()
            .for_each(|g| *g = edge_weight(*g, scale, config.eps));
    });
    EdgeWeights {
        weights,
        degenerate: false,
    }
}
