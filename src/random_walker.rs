use crate::arrays::{Array3D, SeedValue, Volume};
use crate::common::{CancellationToken, Config, Error};
use crate::compose::compose_labels;
use crate::graph::make_graph_edges;
use crate::laplacian::build_laplacian;
use crate::seeds::{preprocess, Preprocessed, SkipReason};
use crate::solver::{solve_linear_system, ClassSolve, ProbabilityMatrix};
use crate::system::build_linear_system;
use crate::weights::compute_weights;
use log::{debug, info};
use std::borrow::Cow;
use std::time::Instant;

/// Non-fatal conditions of a segmentation run.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Zero intensity variance, all edges got the same weight.
    DegenerateWeights,
    /// Unlabeled voxels without a path to any seed, left unlabeled in the output.
    UnreachableRegion { count: usize },
    /// A class column stopped at the iteration cap. Its approximate probabilities are still used.
    SolverNonConvergence {
        class_value: i64,
        iterations: usize,
        residual: f64,
    },
}

/// What happened during one segmentation call.
#[derive(Debug, Clone, Default)]
pub struct SegmentationReport {
    pub num_classes: usize,
    /// Original label value of every solved class.
    pub class_values: Vec<i64>,
    /// Number of solved unknowns.
    pub num_unlabeled: usize,
    /// Linear indices of unlabeled voxels that could not be classified.
    pub unreachable: Vec<usize>,
    /// Seeds passed through without being part of the solve, `(index, value)`.
    pub isolated_seeds: Vec<(usize, i64)>,
    pub solves: Vec<ClassSolve>,
    pub warnings: Vec<Warning>,
    /// Set when no linear system was solved and the seeds were returned unchanged.
    pub skipped: Option<SkipReason>,
}

#[derive(Debug, Clone)]
pub struct Segmentation<S> {
    pub labels: Array3D<S>,
    pub report: SegmentationReport,
}

/// Per-class probabilities of the solved voxels.
#[derive(Debug, Clone)]
pub struct ProbabilityOutput {
    pub probabilities: ProbabilityMatrix,
    /// Linear voxel index of every probability column.
    pub unlabeled: Vec<usize>,
    /// Original label value of every probability row.
    pub class_values: Vec<i64>,
}

fn check_shapes<S>(volume: &Volume, seeds: &Array3D<S>) -> Result<(), Error> {
    if volume.shape() != seeds.shape() {
        return Err(Error::InvalidShape {
            volume: volume.shape(),
            seeds: seeds.shape(),
        });
    }
    if seeds.len() >= u32::MAX as usize {
        return Err(Error::TooManyVoxels(seeds.len()));
    }
    Ok(())
}

fn condition_volume<'a>(volume: &'a Volume, config: &Config) -> Cow<'a, Volume> {
    let mut volume = Cow::Borrowed(volume);
    if let Some(window) = &config.window {
        volume = Cow::Owned(volume.windowed(window));
    }
    if config.normalize_intensity {
        volume = Cow::Owned(volume.normalized());
    }
    volume
}

fn run<S: SeedValue>(
    volume: &Volume,
    seeds: &Array3D<S>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<(Segmentation<S>, Option<ProbabilityOutput>), Error> {
    check_shapes(volume, seeds)?;
    let start = Instant::now();
    let mut report = SegmentationReport::default();

    let prepared = match preprocess(seeds)? {
        Preprocessed::Solve(prepared) => prepared,
        Preprocessed::Skip {
            reason,
            isolated_seeds,
            unreachable,
        } => {
            info!("nothing to solve ({reason:?}), returning seeds unchanged");
            if !unreachable.is_empty() {
                report.warnings.push(Warning::UnreachableRegion {
                    count: unreachable.len(),
                });
            }
            report.skipped = Some(reason);
            report.isolated_seeds = isolated_seeds;
            report.unreachable = unreachable;
            let labels = seeds.clone();
            return Ok((Segmentation { labels, report }, None));
        }
    };
    if !prepared.unreachable.is_empty() {
        report.warnings.push(Warning::UnreachableRegion {
            count: prepared.unreachable.len(),
        });
    }
    report.num_classes = prepared.num_classes;
    report.class_values = prepared.class_values.clone();
    report.isolated_seeds = prepared.isolated_seeds.clone();
    report.unreachable = prepared.unreachable.clone();

    let volume = condition_volume(volume, config);
    let edges = make_graph_edges(volume.shape());
    let weights = compute_weights(&volume, &edges, config);
    if weights.degenerate {
        report.warnings.push(Warning::DegenerateWeights);
    }
    let laplacian = build_laplacian(&edges, &weights.weights, volume.num_voxels());
    drop(edges);
    debug!("graph and laplacian built in {:?}", start.elapsed());

    let Some(system) = build_linear_system(&laplacian, &prepared) else {
        report.skipped = Some(SkipReason::NothingReachable);
        let labels = seeds.clone();
        return Ok((Segmentation { labels, report }, None));
    };
    drop(laplacian);
    report.num_unlabeled = system.unlabeled.len();

    let (probabilities, solves) = solve_linear_system(&system, config, cancel)?;
    for s in solves.iter().filter(|s| !s.converged) {
        report.warnings.push(Warning::SolverNonConvergence {
            class_value: prepared.class_values[s.class],
            iterations: s.iterations,
            residual: s.residual,
        });
    }
    report.solves = solves;

    let labels = compose_labels(seeds, &system.unlabeled, &probabilities, &prepared.class_values);
    info!(
        "segmented {} voxels into {} classes in {:?}, {} warnings",
        report.num_unlabeled,
        report.num_classes,
        start.elapsed(),
        report.warnings.len()
    );
    let probabilities = ProbabilityOutput {
        probabilities,
        unlabeled: system.unlabeled,
        class_values: prepared.class_values,
    };
    Ok((Segmentation { labels, report }, Some(probabilities)))
}

/// Random walker segmentation of `volume` from the sparse `seeds`.
///
/// Seeds: 0 is unlabeled, negative voxels are excluded from the diffusion, positive values are
/// classes. Every reachable unlabeled voxel gets the value of the class whose walkers most likely
/// reach it first, everything else keeps its input value.
pub fn random_walker<S: SeedValue>(
    volume: &Volume,
    seeds: &Array3D<S>,
    config: &Config,
) -> Result<Segmentation<S>, Error> {
    random_walker_with_cancel(volume, seeds, config, &CancellationToken::new())
}

/// Same as [`random_walker`] with cooperative cancellation of the solve.
pub fn random_walker_with_cancel<S: SeedValue>(
    volume: &Volume,
    seeds: &Array3D<S>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Segmentation<S>, Error> {
    run(volume, seeds, config, cancel).map(|(segmentation, _)| segmentation)
}

/// Same as [`random_walker`], additionally returns the per-class probabilities of the solved
/// voxels. The probabilities are `None` when nothing was solved.
pub fn random_walker_with_probabilities<S: SeedValue>(
    volume: &Volume,
    seeds: &Array3D<S>,
    config: &Config,
) -> Result<(Segmentation<S>, Option<ProbabilityOutput>), Error> {
    run(volume, seeds, config, &CancellationToken::new())
}

/// Convenience entry with the two commonly tuned parameters.
pub fn segment<S: SeedValue>(
    volume: &Volume,
    seeds: &Array3D<S>,
    beta: f64,
    tol: f64,
) -> Result<Array3D<S>, Error> {
    let config = Config {
        beta,
        tol,
        ..Config::default()
    };
    random_walker(volume, seeds, &config).map(|s| s.labels)
}
