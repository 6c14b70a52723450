use crate::window::Window;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors which abort the segmentation before any result is produced.
///
/// Numerical degeneracies are not errors, they are reported as [`crate::random_walker::Warning`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Volume and seed map have different shapes.
    #[error("volume shape {volume:?} does not match seeds shape {seeds:?}")]
    InvalidShape {
        volume: [usize; 3],
        seeds: [usize; 3],
    },
    /// Only 2D and 3D inputs are supported.
    #[error("unsupported rank {0}, expected 2 or 3")]
    UnsupportedRank(usize),
    /// Data length does not match the given dimensions.
    #[error("dimension mismatch: {len} elements for shape {shape:?}")]
    DimensionMismatch { len: usize, shape: [usize; 3] },
    /// A volume needs at least one intensity channel.
    #[error("volume without channels")]
    NoChannels,
    /// Channels of a multi-channel volume must share one shape.
    #[error("channel {channel} has shape {found:?}, expected {expected:?}")]
    ChannelShapeMismatch {
        channel: usize,
        expected: [usize; 3],
        found: [usize; 3],
    },
    /// Seed map without any positive class.
    #[error("no positive seed label present, nothing to diffuse")]
    NoSeeds,
    /// Linear voxel indices must fit into `u32`.
    #[error("volume of {0} voxels is too large")]
    TooManyVoxels(usize),
    /// Cancelled through [`CancellationToken`].
    #[error("segmentation cancelled")]
    Cancelled,
}

/// How the per-class right-hand sides are solved.
#[derive(Clone, PartialEq, Debug, Copy)]
pub enum SolveStrategy {
    /// Solve classes one after another. Used for debugging and determinism checks.
    SingleThread,
    /// Every class column is its own rayon task. The matrix and the preconditioner are shared
    /// read-only between the tasks.
    PerClassParallel,
}

/// Parameters of the smoothed aggregation multigrid preconditioner.
#[derive(Clone, Debug)]
pub struct AmgConfig {
    /// Strength of connection threshold. Entry `a_ij` is strong when
    /// `|a_ij| >= theta * sqrt(a_ii * a_jj)`.
    pub strength_threshold: f64,
    /// Maximum number of levels including the finest one.
    pub max_levels: usize,
    /// Stop coarsening when the level is at most this large. The coarsest level is solved directly.
    pub coarse_size: usize,
    /// Number of Jacobi sweeps before and after the coarse grid correction.
    pub smoothing_sweeps: usize,
    /// Damping of the Jacobi smoother and of the prolongator smoothing step, scaled by the inverse
    /// spectral radius estimate of the operator it is applied to.
    pub jacobi_weight: f64,
}
impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            strength_threshold: 0.08,
            max_levels: 10,
            coarse_size: 500,
            smoothing_sweeps: 1,
            jacobi_weight: 4.0 / 3.0,
        }
    }
}

/// Main config for the segmentation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Diffusion sharpness. Higher means walkers are stopped more strongly by intensity edges.
    pub beta: f64,
    /// Relative residual tolerance of the conjugate gradient, `||r|| <= tol * ||b||`.
    ///
    /// Prefer tight values near class ties, the argmax margin depends on it.
    pub tol: f64,
    /// Floor added to every edge weight, keeps the reduced system positive definite.
    pub eps: f64,
    /// Iteration cap for each class column.
    pub max_iterations: usize,
    /// Normalizer of the weight exponent, the exponent is `-beta * g² / (std_scale * stddev)`.
    ///
    /// Empirical constant of the random walker method. Leave it at 10 unless you validated
    /// something else on your data.
    pub std_scale: f64,
    /// Optional display window applied to the intensities before the weights are computed.
    pub window: Option<Window>,
    /// Rescale intensities to `[0, 1]` (after windowing) before the weights are computed.
    pub normalize_intensity: bool,
    pub amg: AmgConfig,
    pub solve_strategy: SolveStrategy,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            beta: 130.0,
            tol: 1e-3,
            eps: 1e-8,
            max_iterations: 30,
            std_scale: 10.0,
            window: None,
            normalize_intensity: false,
            amg: AmgConfig::default(),
            solve_strategy: SolveStrategy::PerClassParallel,
        }
    }
}

/// Cooperative cancellation flag. Clones share the same flag.
///
/// The solver checks it between conjugate gradient iterations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed)
    }
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub(crate) fn split_length_to_ranges(length: usize, splits: usize) -> Vec<Range<usize>> {
    let splits = splits.max(1);
    let chunk_size = length / splits;
    let rem = length % splits;
    (0..splits)
        .scan((rem, 0usize), |(r, acc), _split| {
            let mut size = chunk_size;
            if *r > 0 {
                *r -= 1;
                size += 1;
            }
            let out = (*acc, *acc + size);
            *acc += size;
            Some(out.0..out.1)
        })
        .filter(|r| !r.is_empty())
        .collect()
}
