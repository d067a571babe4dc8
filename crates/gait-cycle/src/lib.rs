//! # Gait-Cycle
//!
//! Subject stage of the gait analysis pipeline. Each subject pass runs
//! strictly in order:
//!
//! 1. **Preparation** ([`prepare`]): validate the configuration against the
//!    recorded joints, standardise heights, convert units, normalise gait
//!    direction
//! 2. **Extraction** ([`extract`]): turn annotated swing/stance latencies into
//!    frame ranges and drop cycles failing consistency or tracking checks
//! 3. **Features** ([`features`]): per cycle, add joint angles, velocities and
//!    accelerations
//! 4. **Normalization** ([`normalize`]): resample each cycle onto a fixed bin grid
//! 5. **Averaging** ([`aggregate`]): mean and SD across a subject's cycles
//!
//! [`subject`] chains the stages and persists the results; [`batch`] runs many
//! subject passes concurrently and returns once all of them have finished.

pub mod aggregate;
pub mod batch;
pub mod export;
pub mod extract;
pub mod features;
pub mod locate;
pub mod normalize;
pub mod prepare;
pub mod subject;

pub use aggregate::*;
pub use batch::*;
pub use export::*;
pub use extract::*;
pub use features::*;
pub use locate::*;
pub use normalize::*;
pub use prepare::*;
pub use subject::*;
