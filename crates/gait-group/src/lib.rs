//! # Gait-Group
//!
//! Group stage of the step-cycle pipeline. Runs after every subject pass has
//! finished and its results are on disk.
//!
//! ## Stages
//!
//! 1. [`loader`] - reassemble subject results per group, verify bin counts
//!    and configuration snapshots across all subjects
//! 2. [`grand`] - grand average and SD across subjects
//! 3. [`pca`] - principal components of subject average curves
//! 4. [`stats`] - cluster-extent permutation test, RM / Mixed ANOVA and
//!    Tukey HSD per bin
//!
//! [`analysis::run_group_analysis`] chains them and writes the group
//! artifacts.

pub mod analysis;
pub mod grand;
pub mod loader;
pub mod pca;
pub mod stats;

pub use analysis::*;
pub use grand::*;
pub use loader::*;
pub use pca::*;
