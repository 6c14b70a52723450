use crate::arrays::{Array3D, SeedValue};
use crate::common::Error;
use crate::conectivity::label_components;
use log::{debug, warn};

/// Seed value validated once at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedLabel {
    /// 0, solved for.
    Unlabeled,
    /// Negative, never part of the diffusion domain.
    Excluded,
    /// Positive class with the caller's original value.
    Class(i64),
}

impl SeedLabel {
    #[inline(always)]
    pub fn from_raw(value: i64) -> Self {
        match value {
            0 => SeedLabel::Unlabeled,
            v if v < 0 => SeedLabel::Excluded,
            v => SeedLabel::Class(v),
        }
    }
}

/// Why no linear system is solved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The seed map has no unlabeled voxel.
    NoUnlabeled,
    /// Every unlabeled voxel is cut off from all seeds.
    NothingReachable,
    /// Pruning left no seed class connected to an unlabeled voxel.
    NoRetainedClasses,
}

/// Seed map prepared for the linear system.
#[derive(Debug, Clone)]
pub struct PreparedSeeds {
    /// Dense labels: 0 unlabeled, `1..=num_classes` seeds, -1 outside of the domain.
    pub labels: Vec<i32>,
    pub num_classes: usize,
    /// Original seed value of dense class `c + 1`, ascending.
    pub class_values: Vec<i64>,
    /// Active domain, `None` when it is the whole volume.
    pub domain: Option<Vec<bool>>,
    /// Seeds with no unlabeled voxel in their component, `(index, original value)`.
    pub isolated_seeds: Vec<(usize, i64)>,
    /// Unlabeled voxels with no path to any seed.
    pub unreachable: Vec<usize>,
}

#[derive(Debug, Clone)]
pub enum Preprocessed {
    Solve(PreparedSeeds),
    Skip {
        reason: SkipReason,
        isolated_seeds: Vec<(usize, i64)>,
        unreachable: Vec<usize>,
    },
}

/// Validates the seed map, prunes isolated seeds and unreachable voxels and renumbers the classes
/// to `1..=K`.
///
/// The input is not modified.
pub fn preprocess<S: SeedValue>(seeds: &Array3D<S>) -> Result<Preprocessed, Error> {
    let labels: Vec<SeedLabel> = seeds
        .data
        .iter()
        .map(|v| SeedLabel::from_raw(v.to_i64()))
        .collect();
    let has_null = labels.iter().any(|l| *l == SeedLabel::Unlabeled);
    let has_excluded = labels.iter().any(|l| *l == SeedLabel::Excluded);
    if !labels.iter().any(|l| matches!(l, SeedLabel::Class(_))) {
        return Err(Error::NoSeeds);
    }
    if !has_null {
        return Ok(Preprocessed::Skip {
            reason: SkipReason::NoUnlabeled,
            isolated_seeds: Vec::new(),
            unreachable: Vec::new(),
        });
    }

    let mut isolated_seeds = Vec::new();
    let mut unreachable = Vec::new();
    let domain = if has_excluded {
        let in_domain: Vec<bool> = labels.iter().map(|l| *l != SeedLabel::Excluded).collect();
        let cc = label_components(&in_domain, seeds.shape());
        let mut comp_has_null = vec![false; cc.num_components as usize];
        let mut comp_has_seed = vec![false; cc.num_components as usize];
        for (label, comp) in labels.iter().zip(&cc.component_assignment) {
            match label {
                SeedLabel::Unlabeled => comp_has_null[*comp as usize] = true,
                SeedLabel::Class(_) => comp_has_seed[*comp as usize] = true,
                SeedLabel::Excluded => {}
            }
        }
        let mut domain = in_domain;
        for (i, (label, comp)) in labels.iter().zip(&cc.component_assignment).enumerate() {
            match label {
                SeedLabel::Class(value) if !comp_has_null[*comp as usize] => {
                    isolated_seeds.push((i, *value));
                    domain[i] = false;
                }
                SeedLabel::Unlabeled if !comp_has_seed[*comp as usize] => {
                    unreachable.push(i);
                    domain[i] = false;
                }
                _ => {}
            }
        }
        debug!(
            "seeds: {} components, {} isolated seeds, {} unreachable voxels",
            cc.num_components,
            isolated_seeds.len(),
            unreachable.len()
        );
        if !unreachable.is_empty() {
            warn!(
                "{} unlabeled voxels have no path to any seed and stay unlabeled",
                unreachable.len()
            );
        }
        if !domain
            .iter()
            .zip(&labels)
            .any(|(inside, l)| *inside && *l == SeedLabel::Unlabeled)
        {
            return Ok(Preprocessed::Skip {
                reason: SkipReason::NothingReachable,
                isolated_seeds,
                unreachable,
            });
        }
        Some(domain)
    } else {
        None
    };

    let inside = |i: usize| domain.as_ref().map_or(true, |d| d[i]);
    let mut class_values: Vec<i64> = labels
        .iter()
        .enumerate()
        .filter_map(|(i, l)| match l {
            SeedLabel::Class(v) if inside(i) => Some(*v),
            _ => None,
        })
        .collect();
    class_values.sort_unstable();
    class_values.dedup();
    if class_values.is_empty() {
        return Ok(Preprocessed::Skip {
            reason: SkipReason::NoRetainedClasses,
            isolated_seeds,
            unreachable,
        });
    }

    let dense: Vec<i32> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| match l {
            _ if !inside(i) => -1,
            SeedLabel::Unlabeled => 0,
            SeedLabel::Excluded => -1,
            SeedLabel::Class(v) => match class_values.binary_search(v) {
                Ok(c) => c as i32 + 1,
                Err(_) => -1,
            },
        })
        .collect();
    Ok(Preprocessed::Solve(PreparedSeeds {
        labels: dense,
        num_classes: class_values.len(),
        class_values,
        domain,
        isolated_seeds,
        unreachable,
    }))
}
