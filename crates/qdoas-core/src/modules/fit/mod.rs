//! Fit-properties workspace: the buffers of an analysis window's linear
//! system and the pixel range they cover.

mod range;
mod workspace;

pub use range::{PixelInterval, RangeError, SpectralRange};
pub use workspace::{FitDimensions, FitWorkspace, WorkspaceError, WorkspaceState};
