use super::{residual, SolveAlgorithm};
use crate::control::SolverControl;
use crate::convergence::{guarded_ratio, Convergence, SolveReport, SolverPhase};
use crate::preconditioner::PreparedPreconditioner;
use num_traits::{One, Zero};
use sparse_core::{Device, Matrix, Real, Result};

/// Preconditioned Conjugate Gradient, for symmetric positive-definite `A`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateGradient;

impl ConjugateGradient {
    pub fn new() -> Self {
        Self
    }
}

impl<D: Device> SolveAlgorithm<D> for ConjugateGradient {
    fn name(&self) -> &'static str {
        "CG"
    }

    async fn solve(
        &self,
        device: &D,
        a: &D::CsrMatrix,
        x: &mut D::Vector,
        b: &D::Vector,
        control: &SolverControl,
    ) -> Result<SolveReport> {
        <Self as SolveAlgorithm<D>>::validate_inputs(self, a, x, b)?;
        let n = a.rows();
        let one = D::Value::one();
        let zero = D::Value::zero();

        // Init
        let preconditioner =
            PreparedPreconditioner::setup(device, a, control.preconditioner).await?;
        let b_norm = device.nrm2(b).await?.into_f64();
        let monitor = Convergence::new("CG", control, b_norm);

        let mut r = device.create_zeros("cg_r", n)?;
        residual(device, a, x, b, &mut r).await?;
        let initial_residual = device.nrm2(&r).await?.into_f64();
        let mut residual_norm = initial_residual;
        let mut phase = monitor.start(initial_residual);
        let mut iterations = 0;

        if !phase.is_terminal() {
            let mut z = device.create_zeros("cg_z", n)?;
            let mut p = device.create_zeros("cg_p", n)?;
            let mut ap = device.create_zeros("cg_ap", n)?;
            preconditioner.apply(device, &r, &mut z).await?;
            device.copy(&z, &mut p).await?;
            let mut rz = device.dot(&r, &z).await?;

            while let SolverPhase::Iterating { iteration } = phase {
                let k = iteration + 1;
                device.csrmv(one, a, &p, zero, &mut ap).await?;
                let p_ap = device.dot(&p, &ap).await?;
                let alpha = match guarded_ratio(rz, p_ap, "p_dot_ap") {
                    Ok(alpha) => alpha,
                    Err(breakdown) => {
                        phase = breakdown;
                        break;
                    }
                };
                monitor.trace(k, "alpha", alpha);

                device.axpy(alpha, &p, x).await?;
                device.axpy(-alpha, &ap, &mut r).await?;
                iterations = k;
                residual_norm = device.nrm2(&r).await?.into_f64();
                phase = monitor.step(k, residual_norm);
                if phase.is_terminal() {
                    break;
                }

                preconditioner.apply(device, &r, &mut z).await?;
                let rz_next = device.dot(&r, &z).await?;
                let beta = match guarded_ratio(rz_next, rz, "r_dot_z") {
                    Ok(beta) => beta,
                    Err(breakdown) => {
                        phase = breakdown;
                        break;
                    }
                };
                monitor.trace(k, "beta", beta);
                rz = rz_next;
                // p = z + beta * p
                device.axpby(one, &z, beta, &mut p).await?;
            }
        }

        Ok(monitor.finish(phase, iterations, residual_norm, initial_residual))
    }
}
