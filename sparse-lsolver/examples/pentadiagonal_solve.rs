use sparse_core::{compute_meta, compute_meta_size, RowBlock, RowBlocks, Triplet};
use sparse_lsolver::{
    BiCGStab, ConjugateGradient, CpuDevice, CsrMatrix, Device, GpuDevice, Preconditioner,
    SolveAlgorithm, SolveReport, SolverControl, Vector,
};
use std::time::Instant;

/// Creates a pentadiagonal sparse matrix A of size n x n.
/// Diagonals:
/// - Main: 4.0
/// - Adjacent (+1, -1): -1.0
/// - Outer (+2, -2): -0.5
fn create_pentadiagonal_matrix(n: usize) -> CsrMatrix<f32> {
    let mut triplets = Vec::new();
    for i in 0..n {
        if i >= 2 {
            triplets.push(Triplet::new(i, i - 2, -0.5));
        }
        if i >= 1 {
            triplets.push(Triplet::new(i, i - 1, -1.0));
        }
        triplets.push(Triplet::new(i, i, 4.0));
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, -1.0));
        }
        if i + 2 < n {
            triplets.push(Triplet::new(i, i + 2, -0.5));
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).expect("Failed to create sparse matrix")
}

/// Creates a vector b of size n with b[i] = sin(i / n).
fn create_sin_vector(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i as f32 / n as f32).sin()).collect()
}

fn log_report(label: &str, report: &SolveReport, elapsed: std::time::Duration) {
    log::info!("{}:", label);
    log::info!("  Status: {:?}", report.status);
    log::info!("  Iterations: {}", report.iterations);
    log::info!("  Final Residual Norm: {:.6e}", report.residual_norm);
    log::info!("  Time elapsed: {:?}", elapsed);
}

async fn run<D, S>(
    label: &str,
    device: &D,
    solver: &S,
    a: &CsrMatrix<f32>,
    b: &[f32],
    control: &SolverControl,
) where
    D: Device<Value = f32>,
    S: SolveAlgorithm<D>,
{
    let start = Instant::now();
    let a = device.upload_csr(a).expect("Failed to upload matrix");
    let b = device.create_vector("b", b).expect("Failed to create b");
    let mut x = device.create_zeros("x", b.len()).expect("Failed to create x");
    match solver.solve(device, &a, &mut x, &b, control).await {
        Ok(report) => log_report(label, &report, start.elapsed()),
        Err(e) => log::error!("{} failed: {}", label, e),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let n = 500;
    log::info!("Setting up {}x{} pentadiagonal matrix A and sin vector b...", n, n);
    let mut a = create_pentadiagonal_matrix(n);
    let b = create_sin_vector(n);

    // Partition through the two-pass interface.
    let size = compute_meta_size(&a).expect("Failed to size row blocks");
    let mut descriptors = vec![RowBlock::rows(0); size];
    compute_meta(&a, &mut descriptors).expect("Failed to compute row blocks");
    log::info!("Partitioned {} rows into {} row blocks", n, size);
    let version = a.version();
    a.set_row_blocks(RowBlocks::new(descriptors, version, Default::default()));

    let control = SolverControl::default()
        .with_rel_tol(1e-5)
        .with_max_iters(n * 5)
        .with_preconditioner(Preconditioner::Diagonal);

    let cpu = CpuDevice::<f32>::new().expect("Failed to create CPU device");
    run("CPU Conjugate Gradient", &cpu, &ConjugateGradient, &a, &b, &control).await;
    run("CPU BiCGStab", &cpu, &BiCGStab, &a, &b, &control).await;

    let gpu = match GpuDevice::new().await {
        Ok(gpu) => gpu,
        Err(e) => {
            log::warn!("No GPU available, skipping GPU solves: {}", e);
            return;
        }
    };
    gpu.reset_transfer_stats();
    run("GPU Conjugate Gradient", &gpu, &ConjugateGradient, &a, &b, &control).await;
    run("GPU BiCGStab", &gpu, &BiCGStab, &a, &b, &control).await;

    let stats = gpu.transfer_stats();
    log::info!("GPU Transfer Stats:");
    log::info!("  Bytes CPU -> GPU: {}", stats.bytes_to_gpu);
    log::info!("  Bytes GPU -> CPU: {}", stats.bytes_from_gpu);
}
