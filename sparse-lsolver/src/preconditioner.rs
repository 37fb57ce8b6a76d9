use crate::control::Preconditioner;
use num_traits::{One, Zero};
use sparse_core::{Device, ElementwiseOp, Matrix, Result, SparseError};

/// A preconditioner prepared for one matrix: `z = M⁻¹ r`.
pub(crate) enum PreparedPreconditioner<D: Device> {
    Identity,
    Jacobi { inverse_diagonal: D::Vector },
}

impl<D: Device> PreparedPreconditioner<D> {
    /// Builds the preconditioner. A zero on the diagonal fails with
    /// `InvalidArgument` before any solver state is touched.
    pub(crate) async fn setup(
        device: &D,
        a: &D::CsrMatrix,
        kind: Preconditioner,
    ) -> Result<Self> {
        match kind {
            Preconditioner::None => Ok(Self::Identity),
            Preconditioner::Diagonal => {
                log::debug!("Setting up Jacobi preconditioner");
                let mut diagonal = device.create_zeros("diagonal", a.rows())?;
                device.extract_diagonal(a, &mut diagonal).await?;
                let mut values = device.read_vector(&diagonal).await?;
                if let Some(row) = values.iter().position(|d| d.is_zero()) {
                    return Err(SparseError::InvalidArgument(format!(
                        "Diagonal preconditioner needs a non-zero diagonal, row {} is zero",
                        row
                    )));
                }
                for d in values.iter_mut() {
                    *d = D::Value::one() / *d;
                }
                device.write_vector(&mut diagonal, &values).await?;
                Ok(Self::Jacobi {
                    inverse_diagonal: diagonal,
                })
            }
        }
    }

    pub(crate) async fn apply(&self, device: &D, r: &D::Vector, z: &mut D::Vector) -> Result<()> {
        match self {
            Self::Identity => device.copy(r, z).await,
            Self::Jacobi { inverse_diagonal } => {
                device
                    .elementwise(ElementwiseOp::Mul, inverse_diagonal, r, z)
                    .await
            }
        }
    }
}
