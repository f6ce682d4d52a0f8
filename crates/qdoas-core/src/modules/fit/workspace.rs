use super::range::SpectralRange;
use crate::domain::DoasError;
use crate::numerics::DenseMatrix;
use tracing::trace;

/// Sizes of the linear system: `columns` basis functions (`dim_c`) over
/// `points` selected pixels (`dim_l`), with a `polynomial` sub-basis (`dim_p`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitDimensions {
    pub columns: usize,
    pub points: usize,
    pub polynomial: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Released,
    Ready,
    /// A fit is running; seen by `prepare` only if that fit was interrupted.
    InUse,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("cannot allocate a fit workspace with {columns} columns and {points} points")]
    ZeroDimension { columns: usize, points: usize },
    #[error("fit workspace is already allocated")]
    AlreadyAllocated,
    #[error("fit workspace is not allocated")]
    NotAllocated,
    #[error("spectral range selects {actual} points, workspace holds {expected}")]
    RangeLengthMismatch { expected: usize, actual: usize },
}

impl From<WorkspaceError> for DoasError {
    fn from(error: WorkspaceError) -> Self {
        match error {
            WorkspaceError::ZeroDimension { .. } => {
                DoasError::allocation("FIT.WORKSPACE", error.to_string())
            }
            _ => DoasError::internal("FIT.WORKSPACE", error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct FitBuffers {
    dimensions: FitDimensions,
    design: DenseMatrix,
    polynomial_basis: DenseMatrix,
    covariance: DenseMatrix,
    sigma_sqr: Vec<f64>,
    range: Option<SpectralRange>,
}

/// Reusable buffers of one analysis window's linear system.
#[derive(Debug, Clone)]
pub struct FitWorkspace {
    state: WorkspaceState,
    buffers: Option<FitBuffers>,
}

impl Default for FitWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl FitWorkspace {
    pub const fn new() -> Self {
        Self {
            state: WorkspaceState::Released,
            buffers: None,
        }
    }

    pub const fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn is_allocated(&self) -> bool {
        self.buffers.is_some()
    }

    pub fn dimensions(&self) -> Option<FitDimensions> {
        self.buffers.as_ref().map(|buffers| buffers.dimensions)
    }

    /// Allocate zeroed buffers for `dimensions`.
    pub fn allocate(&mut self, dimensions: FitDimensions) -> Result<(), WorkspaceError> {
        if self.buffers.is_some() {
            return Err(WorkspaceError::AlreadyAllocated);
        }
        if dimensions.columns == 0 || dimensions.points == 0 {
            return Err(WorkspaceError::ZeroDimension {
                columns: dimensions.columns,
                points: dimensions.points,
            });
        }

        trace!(?dimensions, "allocating fit workspace");
        self.buffers = Some(FitBuffers {
            dimensions,
            design: DenseMatrix::zeros(dimensions.points, dimensions.columns),
            polynomial_basis: DenseMatrix::zeros(dimensions.points, dimensions.polynomial),
            covariance: DenseMatrix::zeros(dimensions.columns, dimensions.columns),
            sigma_sqr: vec![0.0; dimensions.columns],
            range: None,
        });
        self.state = WorkspaceState::Ready;
        Ok(())
    }

    /// Free every buffer and the spectral range. Calling it twice is harmless.
    pub fn release(&mut self) {
        self.buffers = None;
        self.state = WorkspaceState::Released;
    }

    /// Make the workspace ready for `dimensions` over `range`, reusing the
    /// buffers unless the sizes changed or a previous fit never finished.
    pub fn prepare(
        &mut self,
        dimensions: FitDimensions,
        range: SpectralRange,
    ) -> Result<(), WorkspaceError> {
        if range.len() != dimensions.points {
            return Err(WorkspaceError::RangeLengthMismatch {
                expected: dimensions.points,
                actual: range.len(),
            });
        }
        let reusable = self.state == WorkspaceState::Ready && self.dimensions() == Some(dimensions);
        if !reusable {
            self.release();
            self.allocate(dimensions)?;
        }
        if let Some(buffers) = self.buffers.as_mut() {
            buffers.range = Some(range);
        }
        Ok(())
    }

    /// Mark the start of a solve.
    pub fn begin(&mut self) -> Result<(), WorkspaceError> {
        if self.buffers.is_none() {
            return Err(WorkspaceError::NotAllocated);
        }
        self.state = WorkspaceState::InUse;
        Ok(())
    }

    pub fn finish(&mut self) {
        if self.buffers.is_some() {
            self.state = WorkspaceState::Ready;
        }
    }

    pub fn range(&self) -> Option<&SpectralRange> {
        self.buffers.as_ref().and_then(|buffers| buffers.range.as_ref())
    }

    pub fn design(&self) -> Option<&DenseMatrix> {
        self.buffers.as_ref().map(|buffers| &buffers.design)
    }

    pub fn design_mut(&mut self) -> Result<&mut DenseMatrix, WorkspaceError> {
        self.buffers_mut().map(|buffers| &mut buffers.design)
    }

    pub fn polynomial_basis(&self) -> Option<&DenseMatrix> {
        self.buffers.as_ref().map(|buffers| &buffers.polynomial_basis)
    }

    pub fn polynomial_basis_mut(&mut self) -> Result<&mut DenseMatrix, WorkspaceError> {
        self.buffers_mut().map(|buffers| &mut buffers.polynomial_basis)
    }

    pub fn covariance(&self) -> Option<&DenseMatrix> {
        self.buffers.as_ref().map(|buffers| &buffers.covariance)
    }

    pub fn sigma_sqr(&self) -> Option<&[f64]> {
        self.buffers.as_ref().map(|buffers| buffers.sigma_sqr.as_slice())
    }

    /// Store the coefficient covariance scaled by `chi_square / dof` and
    /// return the resulting variances.
    pub fn store_covariance(
        &mut self,
        unscaled: &DenseMatrix,
        variance_scale: f64,
    ) -> Result<&[f64], WorkspaceError> {
        let buffers = self.buffers_mut()?;
        let columns = buffers.dimensions.columns;
        for row in 0..columns {
            for col in 0..columns {
                buffers.covariance[(row, col)] = unscaled[(row, col)] * variance_scale;
            }
            buffers.sigma_sqr[row] = buffers.covariance[(row, row)];
        }
        Ok(&buffers.sigma_sqr)
    }

    fn buffers_mut(&mut self) -> Result<&mut FitBuffers, WorkspaceError> {
        self.buffers.as_mut().ok_or(WorkspaceError::NotAllocated)
    }
}
