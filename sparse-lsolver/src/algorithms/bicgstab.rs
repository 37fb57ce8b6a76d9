use super::{residual, SolveAlgorithm};
use crate::control::SolverControl;
use crate::convergence::{guarded_ratio, is_breakdown, Convergence, SolveReport, SolverPhase};
use crate::preconditioner::PreparedPreconditioner;
use num_traits::{One, Zero};
use sparse_core::{Device, Matrix, Real, Result};

/// Right-preconditioned BiConjugate Gradient Stabilized, for general
/// (non-symmetric) `A`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiCGStab;

impl BiCGStab {
    pub fn new() -> Self {
        Self
    }
}

impl<D: Device> SolveAlgorithm<D> for BiCGStab {
    fn name(&self) -> &'static str {
        "BiCGStab"
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
        let monitor = Convergence::new("BiCGStab", control, b_norm);

        let mut r = device.create_zeros("bicgstab_r", n)?;
        residual(device, a, x, b, &mut r).await?;
        let initial_residual = device.nrm2(&r).await?.into_f64();
        let mut residual_norm = initial_residual;
        let mut phase = monitor.start(initial_residual);
        let mut iterations = 0;

        if !phase.is_terminal() {
            let mut r_hat = device.create_zeros("bicgstab_r_hat", n)?;
            device.copy(&r, &mut r_hat).await?;
            let mut p = device.create_zeros("bicgstab_p", n)?;
            let mut p_hat = device.create_zeros("bicgstab_p_hat", n)?;
            let mut v = device.create_zeros("bicgstab_v", n)?;
            let mut s = device.create_zeros("bicgstab_s", n)?;
            let mut s_hat = device.create_zeros("bicgstab_s_hat", n)?;
            let mut t = device.create_zeros("bicgstab_t", n)?;

            let mut rho_prev = one;
            let mut alpha = one;
            let mut omega = one;

            while let SolverPhase::Iterating { iteration } = phase {
                let k = iteration + 1;
                let rho = device.dot(&r_hat, &r).await?;
                if is_breakdown(rho) {
                    phase = SolverPhase::Breakdown { quantity: "rho" };
                    break;
                }
                monitor.trace(k, "rho", rho);

                if k == 1 {
                    device.copy(&r, &mut p).await?;
                } else {
                    let beta = (rho / rho_prev) * (alpha / omega);
                    monitor.trace(k, "beta", beta);
                    // p = r + beta * (p - omega * v)
                    device.axpy(-omega, &v, &mut p).await?;
                    device.axpby(one, &r, beta, &mut p).await?;
                }

                preconditioner.apply(device, &p, &mut p_hat).await?;
                device.csrmv(one, a, &p_hat, zero, &mut v).await?;
                let r_hat_v = device.dot(&r_hat, &v).await?;
                alpha = match guarded_ratio(rho, r_hat_v, "r_hat_dot_v") {
                    Ok(alpha) => alpha,
                    Err(breakdown) => {
                        phase = breakdown;
                        break;
                    }
                };
                monitor.trace(k, "alpha", alpha);

                // s = r - alpha * v
                device.copy(&r, &mut s).await?;
                device.axpy(-alpha, &v, &mut s).await?;
                let s_norm = device.nrm2(&s).await?.into_f64();
                if monitor.is_converged(s_norm) {
                    device.axpy(alpha, &p_hat, x).await?;
                    iterations = k;
                    residual_norm = s_norm;
                    phase = monitor.step(k, s_norm);
                    break;
                }

                preconditioner.apply(device, &s, &mut s_hat).await?;
                device.csrmv(one, a, &s_hat, zero, &mut t).await?;
                let t_t = device.dot(&t, &t).await?;
                let t_s = device.dot(&t, &s).await?;
                omega = match guarded_ratio(t_s, t_t, "t_dot_t") {
                    Ok(omega) => omega,
                    Err(breakdown) => {
                        phase = breakdown;
                        break;
                    }
                };
                monitor.trace(k, "omega", omega);

                device.axpy(alpha, &p_hat, x).await?;
                device.axpy(omega, &s_hat, x).await?;
                // r = s - omega * t
                device.copy(&s, &mut r).await?;
                device.axpy(-omega, &t, &mut r).await?;

                iterations = k;
                residual_norm = device.nrm2(&r).await?.into_f64();
                phase = monitor.step(k, residual_norm);
                if !phase.is_terminal() && is_breakdown(omega) {
                    phase = SolverPhase::Breakdown { quantity: "omega" };
                }
                rho_prev = rho;
            }
        }

        Ok(monitor.finish(phase, iterations, residual_norm, initial_residual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Preconditioner, PrintMode};
    use crate::convergence::SolveStatus;
    use pollster::block_on;
    use sparse_core::{CpuConfig, CpuDevice, CsrMatrix, Triplet};

    fn device() -> CpuDevice<f64> {
        CpuDevice::with_config(CpuConfig::default().with_threads(2)).unwrap()
    }

    fn quiet() -> SolverControl {
        SolverControl::default()
            .with_print_mode(PrintMode::Quiet)
            .with_rel_tol(1e-10)
    }

    fn non_symmetric() -> CsrMatrix<f64> {
        let triplets = [
            Triplet::new(0, 0, 4.0),
            Triplet::new(0, 1, -1.0),
            Triplet::new(1, 0, 2.0),
            Triplet::new(1, 1, 5.0),
            Triplet::new(1, 2, -1.0),
            Triplet::new(2, 1, 1.0),
            Triplet::new(2, 2, 3.0),
        ];
        CsrMatrix::from_triplets(3, 3, &triplets).unwrap()
    }

    #[test]
    fn solves_a_non_symmetric_system() {
        let device = device();
        let host = non_symmetric();
        let a = device.upload_csr(&host).unwrap();
        // b = A * [1, 2, 3]
        let b = device.create_vector("b", &[2.0, 9.0, 11.0]).unwrap();
        for preconditioner in [Preconditioner::None, Preconditioner::Diagonal] {
            let mut x = device.create_zeros("x", 3).unwrap();
            let control = quiet().with_preconditioner(preconditioner);
            let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &control)).unwrap();
            assert_eq!(report.status, SolveStatus::Converged, "{:?}", preconditioner);
            for (got, want) in x.as_slice().iter().zip([1.0, 2.0, 3.0]) {
                assert!((got - want).abs() < 1e-8, "{} vs {}", got, want);
            }
        }
    }

    #[test]
    fn skew_matrix_breaks_down() {
        let device = device();
        let host = CsrMatrix::from_csr(2, 2, vec![1.0, -1.0], vec![1, 0], vec![0, 1, 2]).unwrap();
        let a = device.upload_csr(&host).unwrap();
        let b = device.create_vector("b", &[1.0, 1.0]).unwrap();
        let mut x = device.create_zeros("x", 2).unwrap();
        let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &quiet())).unwrap();
        assert_eq!(
            report.status,
            SolveStatus::Breakdown {
                quantity: "r_hat_dot_v"
            }
        );
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn zero_rhs_converges_without_iterating() {
        let device = device();
        let a = device.upload_csr(&non_symmetric()).unwrap();
        let b = device.create_zeros("b", 3).unwrap();
        let mut x = device.create_zeros("x", 3).unwrap();
        let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &quiet())).unwrap();
        assert_eq!(report.status, SolveStatus::Converged);
        assert_eq!(report.iterations, 0);
    }
}
