//! # Gait-Core
//!
//! Shared building blocks for the step-cycle gait analysis pipeline.
//!
//! ## Column Model
//!
//! Pose-estimation exports name their columns by string concatenation
//! (`"Knee y"`, `"Knee, left Z"`). Internally every column is a typed
//! [`ColumnKey`] built from a [`Joint`], a [`Coord`] and an optional [`Side`];
//! display names are derived once, at the serialization boundary.
//!
//! ## Contents
//!
//! - [`CoordFrame`] - per-frame joint coordinates with an exact `Time` axis
//! - [`Table`] - label + numeric columns exchanged between stages and on disk
//! - [`SubjectConfig`] / [`GroupConfig`] - the configuration record
//! - [`IssueLog`] - append-only diagnostic sink (`Issues.txt`)
//! - [`kinematics`] - planar joint angles and three-point gradients

pub mod config;
pub mod error;
pub mod frame;
pub mod issues;
pub mod kinematics;
pub mod table;
pub mod types;

pub use config::*;
pub use error::{Error, ErrorScope, Result};
pub use frame::*;
pub use issues::*;
pub use kinematics::*;
pub use table::*;
pub use types::*;
