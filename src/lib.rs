//! Random walker image segmentation in Rust.
//!
//! This crate implements the random walker algorithm (Grady 2006) for 2D and 3D scalar or
//! multi-channel volumes. Given a sparse seed map, every unlabeled voxel gets the label of the
//! seed class whose random walkers most likely reach it first, where walkers diffuse along
//! lattice edges weighted by local intensity similarity.
//!
//! The pipeline is:
//! - seed preprocessing (pruning of isolated seeds and unreachable voxels, dense relabeling)
//! - lattice graph and edge weights
//! - weighted graph Laplacian
//! - reduced linear system per class
//! - conjugate gradient preconditioned with smoothed aggregation multigrid, one solve per class
//!   running in parallel
//! - argmax over the class probabilities
//!
//! The following example segments a small 2D image with two seed classes:
//!
//! ```rust
//! use random_walker_seg::arrays::{Array3D, Volume};
//! use random_walker_seg::common::Config;
//! use random_walker_seg::random_walker::random_walker;
//!
//! fn main() {
//!     let (width, height) = (16, 8);
//!     // dark left half, bright right half
//!     let pixels: Vec<f64> = (0..width * height)
//!         .map(|i| if i % width < 8 { 0.1 } else { 0.9 })
//!         .collect();
//!     let volume = Volume::new(Array3D::from_slice_2d(&pixels, width, height).unwrap());
//!     // 0 = unlabeled, negative = excluded, positive = class
//!     let mut seeds = Array3D::from_fill(0i32, width, height, 1);
//!     seeds[(0, 0, 0)] = 1;
//!     seeds[(15, 7, 0)] = 2;
//!     let segmentation = random_walker(&volume, &seeds, &Config::default()).unwrap();
//!     assert_eq!(segmentation.labels[(3, 5, 0)], 1);
//!     assert_eq!(segmentation.labels[(12, 2, 0)], 2);
//! }
//! ```
//!
//! Unlabeled voxels which can't be reached from any seed (walled off by negative voxels) stay 0
//! and are listed in the [`random_walker::SegmentationReport`] together with solver statistics.
//!
//! Logging goes through the `log` facade, install any logger to see stage timings.

pub mod amg;
pub mod arrays;
pub mod common;
pub mod compose;
pub mod conectivity;
pub mod graph;
pub mod laplacian;
pub mod random_walker;
pub mod seeds;
pub mod solver;
pub mod sparse;
pub mod system;
pub mod weights;
pub mod window;
