//! # Gait-IO
//!
//! Pluggable I/O boundary of the gait analysis pipeline. The numerical core
//! never touches files directly; everything it consumes or publishes goes
//! through this crate.
//!
//! ## Inputs
//!
//! - **Tracker CSV** (2D): `scorer` / `bodyparts` / `coords` header rows,
//!   first column is a frame index
//! - **Track tensor** (2D): frames × nodes × coords × tracks, flattened for
//!   track 0 (HDF5 decoding happens in the caller)
//! - **3D table**: `<joint> <coord>` and `<joint>, <side> <coord>` headers
//! - **Annotation table**: swing/stance latencies per subject (and run/leg)
//! - **Standardisation table**: one divisor per subject
//!
//! ## Outputs
//!
//! - [`TableStore`] implementations persisting [`gait_core::Table`]s
//! - Configuration snapshot (`config.json`)

pub mod annotation;
pub mod coords;
pub mod snapshot;
pub mod standardisation;
pub mod store;

pub use annotation::*;
pub use coords::*;
pub use snapshot::*;
pub use standardisation::*;
pub use store::*;

use gait_core::Error;

pub(crate) fn csv_error(context: &str, e: csv::Error) -> Error {
    match e.into_kind() {
        csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            Error::InputMissing(format!("{context}: file not found"))
        }
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::IoFormat(format!("{context}: {other:?}")),
    }
}
