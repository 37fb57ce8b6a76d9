use pollster::block_on;
use sparse_core::{CpuConfig, PartitionConfig, Real, Triplet};
use sparse_lsolver::{
    BiCGStab, ConjugateGradient, CpuDevice, CsrMatrix, Device, Preconditioner, PrintMode,
    SolveAlgorithm, SolveStatus, SolverControl,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Main diagonal 4, first off-diagonals -1, second off-diagonals -0.5.
fn pentadiagonal<T: Real>(n: usize) -> CsrMatrix<T> {
    let mut triplets = Vec::new();
    for i in 0..n {
        if i >= 2 {
            triplets.push(Triplet::new(i, i - 2, T::cast_f64(-0.5)));
        }
        if i >= 1 {
            triplets.push(Triplet::new(i, i - 1, T::cast_f64(-1.0)));
        }
        triplets.push(Triplet::new(i, i, T::cast_f64(4.0)));
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, T::cast_f64(-1.0)));
        }
        if i + 2 < n {
            triplets.push(Triplet::new(i, i + 2, T::cast_f64(-0.5)));
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).unwrap()
}

fn host_residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (row, bi) in b.iter().enumerate() {
        let ax: f64 = a
            .row_range(row)
            .map(|k| a.values()[k] * x[a.col_indices()[k]])
            .sum();
        sum += (bi - ax) * (bi - ax);
    }
    sum.sqrt()
}

fn device() -> CpuDevice<f64> {
    CpuDevice::with_config(CpuConfig::default().with_threads(4).with_tile(128)).unwrap()
}

fn control() -> SolverControl {
    SolverControl::default()
        .with_rel_tol(1e-10)
        .with_abs_tol(0.0)
        .with_max_iters(500)
}

#[test]
fn cg_solves_pentadiagonal_on_both_spmv_paths() {
    init_logger();
    let device = device();
    let n = 300;
    let mut host = pentadiagonal::<f64>(n);
    let b_host: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64).sin()).collect();

    for adaptive in [false, true] {
        if adaptive {
            host.compute_row_blocks().unwrap();
        }
        let a = device.upload_csr(&host).unwrap();
        let b = device.create_vector("b", &b_host).unwrap();
        let mut x = device.create_zeros("x", n).unwrap();
        let report = block_on(ConjugateGradient.solve(&device, &a, &mut x, &b, &control())).unwrap();
        assert_eq!(report.status, SolveStatus::Converged);
        assert!(report.iterations > 1);
        assert!(report.residual_norm <= report.initial_residual_norm);
        assert!(host_residual(&host, x.as_slice(), &b_host) < 1e-8);
    }
}

#[test]
fn both_solvers_with_jacobi() {
    init_logger();
    let device = device();
    let n = 200;
    let host = pentadiagonal::<f64>(n);
    let a = device.upload_csr(&host).unwrap();
    let b_host = vec![1.0; n];
    let b = device.create_vector("b", &b_host).unwrap();
    let control = control().with_preconditioner(Preconditioner::Diagonal);

    let mut x = device.create_zeros("x", n).unwrap();
    let report = block_on(ConjugateGradient.solve(&device, &a, &mut x, &b, &control)).unwrap();
    assert!(report.converged());
    assert!(host_residual(&host, x.as_slice(), &b_host) < 1e-8);

    let mut x = device.create_zeros("x", n).unwrap();
    let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &control)).unwrap();
    assert!(report.converged());
    assert!(host_residual(&host, x.as_slice(), &b_host) < 1e-8);
}

fn solve_twice<S: SolveAlgorithm<CpuDevice<f64>>>(solver: S) {
    let device = device();
    let n = 100;
    let a = device.upload_csr(&pentadiagonal::<f64>(n)).unwrap();
    let b = device.create_vector("b", &vec![1.0; n]).unwrap();
    let mut x = device.create_zeros("x", n).unwrap();

    let first = block_on(solver.solve(&device, &a, &mut x, &b, &control())).unwrap();
    assert!(first.converged(), "{}", solver.name());
    let again = block_on(solver.solve(&device, &a, &mut x, &b, &control())).unwrap();
    assert!(again.converged(), "{}", solver.name());
    assert!(again.iterations <= 1, "{}", solver.name());
}

#[test]
fn rerunning_from_a_converged_solution_takes_at_most_one_iteration() {
    init_logger();
    solve_twice(ConjugateGradient);
    solve_twice(BiCGStab);
}

#[test]
fn max_iters_is_reported_not_raised() {
    init_logger();
    let device = device();
    let n = 100;
    let a = device.upload_csr(&pentadiagonal::<f64>(n)).unwrap();
    let b = device.create_vector("b", &vec![1.0; n]).unwrap();
    let control = control().with_max_iters(1).with_print_mode(PrintMode::Verbose);

    let mut x = device.create_zeros("x", n).unwrap();
    let report = block_on(ConjugateGradient.solve(&device, &a, &mut x, &b, &control)).unwrap();
    assert_eq!(report.status, SolveStatus::MaxIterReached);
    assert_eq!(report.iterations, 1);
    // x keeps the last iterate.
    assert!(x.as_slice().iter().any(|&v| v != 0.0));

    let mut x = device.create_zeros("x", n).unwrap();
    let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &control)).unwrap();
    assert_eq!(report.status, SolveStatus::MaxIterReached);
    assert_eq!(report.iterations, 1);
}

#[test]
fn skew_symmetric_matrix_breaks_down_both_solvers() {
    init_logger();
    let device = device();
    let host = CsrMatrix::from_csr(2, 2, vec![1.0, -1.0], vec![1, 0], vec![0, 1, 2]).unwrap();
    let a = device.upload_csr(&host).unwrap();
    let b = device.create_vector("b", &[1.0, 1.0]).unwrap();

    let mut x = device.create_zeros("x", 2).unwrap();
    let report = block_on(ConjugateGradient.solve(&device, &a, &mut x, &b, &control())).unwrap();
    assert!(matches!(report.status, SolveStatus::Breakdown { .. }));

    let mut x = device.create_zeros("x", 2).unwrap();
    let report = block_on(BiCGStab.solve(&device, &a, &mut x, &b, &control())).unwrap();
    assert!(matches!(report.status, SolveStatus::Breakdown { .. }));
}

#[test]
fn single_precision_solve_with_split_rows() {
    init_logger();
    let device = CpuDevice::<f32>::with_config(CpuConfig::default().with_threads(4)).unwrap();
    let n = 64;
    // Dense first row and column keep the matrix SPD and force a split.
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push(Triplet::new(i, i, n as f32 * 2.0));
        if i > 0 {
            triplets.push(Triplet::new(0, i, 1.0f32));
            triplets.push(Triplet::new(i, 0, 1.0f32));
        }
    }
    let mut host = CsrMatrix::from_triplets(n, n, &triplets).unwrap();
    let config = PartitionConfig {
        block_size: 16,
        block_multiplier: 1,
        ..PartitionConfig::default()
    };
    host.compute_row_blocks_with(&config).unwrap();
    assert!(!host.row_blocks().unwrap().split_rows().is_empty());

    let a = device.upload_csr(&host).unwrap();
    let b = device.create_vector("b", &vec![1.0f32; n]).unwrap();
    let mut x = device.create_zeros("x", n).unwrap();
    let control = SolverControl::default().with_rel_tol(1e-5);
    let report = block_on(ConjugateGradient.solve(&device, &a, &mut x, &b, &control)).unwrap();
    assert!(report.converged());
}

#[test]
fn control_round_trips_through_json() {
    let control = SolverControl::default()
        .with_preconditioner(Preconditioner::Diagonal)
        .with_max_iters(42)
        .with_print_mode(PrintMode::Quiet);
    let json = serde_json::to_string(&control).unwrap();
    assert!(json.contains("\"diagonal\""));
    let back: SolverControl = serde_json::from_str(&json).unwrap();
    assert_eq!(back, control);

    let partial: SolverControl = serde_json::from_str(r#"{"max_iters": 5}"#).unwrap();
    assert_eq!(partial.max_iters, 5);
    assert_eq!(partial.rel_tol, SolverControl::default().rel_tol);
}
