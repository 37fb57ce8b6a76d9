//! Kernel launches. Each operation records its dispatches into one command
//! buffer and submits it; only readbacks wait for the device.

use super::kernels::{self, workgroup_count, Step};
use super::matrix::{GpuCooMatrix, GpuCsrMatrix};
use super::vector::{GpuScalar, GpuVector};
use super::GpuDevice;
use crate::device::ElementwiseOp;
use crate::error::{Result, SparseError};
use crate::traits::{Matrix, Vector};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Length, up to two scalars and the element offsets of `x` and `y`.
/// Shared by the fill, scale, axpby, row SpMV, finalize, COO and diagonal
/// kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct ScalarParams {
    n: u32,
    alpha: f32,
    beta: f32,
    x_offset: u32,
    y_offset: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct OpParams {
    n: u32,
    op: u32,
    x_offset: u32,
    y_offset: u32,
    z_offset: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ReducePartialParams {
    n: u32,
    mode: u32,
    groups: u32,
    x_offset: u32,
    y_offset: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ReduceFinalParams {
    count: u32,
    finish: u32,
    out_index: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AdaptiveParams {
    blocks: u32,
    capacity: u32,
    alpha: f32,
    beta: f32,
    rows_for_vector: u32,
    x_offset: u32,
    y_offset: u32,
    _pad: u32,
}

/// What the reduction kernels sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReduceMode {
    Dot,
    AbsSum,
    Sum,
    Norm2,
}

impl ReduceMode {
    fn code(self) -> u32 {
        match self {
            ReduceMode::Dot => 0,
            ReduceMode::AbsSum => 1,
            ReduceMode::Sum => 2,
            ReduceMode::Norm2 => 3,
        }
    }
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SparseError::dims(what, expected, actual));
    }
    Ok(())
}

fn count_u32(what: &str, n: usize) -> Result<u32> {
    u32::try_from(n)
        .map_err(|_| SparseError::InvalidArgument(format!("{} {} exceeds 32 bits", what, n)))
}

impl GpuDevice {
    fn uniform<P: Pod>(&self, label: &str, params: &P) -> wgpu::Buffer {
        self.context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(params),
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    /// Encodes `clears` then `steps` (one compute pass each) and submits.
    /// Validation errors raised while recording surface as `DeviceFailure`.
    async fn submit(
        &self,
        label: &str,
        clears: &[&wgpu::Buffer],
        steps: &[Step<'_>],
    ) -> Result<()> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        // Shader and pipeline creation report into the same scope.
        let pipelines = match steps
            .iter()
            .map(|step| self.pipelines.get(step.kernel))
            .collect::<Result<Vec<_>>>()
        {
            Ok(pipelines) => pipelines,
            Err(e) => {
                let _ = device.pop_error_scope().await;
                return Err(e);
            }
        };
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        for buffer in clears {
            encoder.clear_buffer(buffer, 0, None);
        }
        for (step, cached) in steps.iter().zip(&pipelines) {
            if step.groups == 0 {
                continue;
            }
            let entries: Vec<wgpu::BindGroupEntry> = step
                .buffers
                .iter()
                .enumerate()
                .map(|(binding, buffer)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: buffer.as_entire_binding(),
                })
                .collect();
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(step.kernel.name),
                layout: &cached.layout,
                entries: &entries,
            });
            let (x, y) = kernels::dispatch_dims(step.groups);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(step.kernel.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&cached.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = device.pop_error_scope().await {
            return Err(SparseError::DeviceFailure(format!("{}: {}", label, error)));
        }
        log::trace!("Submitted '{}' ({} dispatches)", label, steps.len());
        Ok(())
    }

    pub(crate) async fn copy_vector(&self, src: &GpuVector, dst: &mut GpuVector) -> Result<()> {
        check_len("copy destination", src.len(), dst.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("copy_vector"),
        });
        encoder.copy_buffer_to_buffer(
            src.buffer(),
            src.byte_offset(),
            dst.buffer(),
            dst.byte_offset(),
            src.byte_len(),
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = device.pop_error_scope().await {
            return Err(SparseError::DeviceFailure(format!(
                "copy '{}' -> '{}': {}",
                src.label(),
                dst.label(),
                error
            )));
        }
        Ok(())
    }

    pub(crate) async fn fill_vector(&self, value: f32, y: &mut GpuVector) -> Result<()> {
        let params = self.uniform(
            "fill_params",
            &ScalarParams {
                n: count_u32("length", y.len())?,
                alpha: value,
                y_offset: y.offset_u32()?,
                ..Default::default()
            },
        );
        let groups = workgroup_count(y.len())?;
        self.submit(
            "fill",
            &[],
            &[Step::new(&kernels::FILL, vec![&params, y.buffer()], groups)],
        )
        .await
    }

    pub(crate) async fn scale_vector(&self, alpha: f32, y: &mut GpuVector) -> Result<()> {
        let params = self.uniform(
            "scale_params",
            &ScalarParams {
                n: count_u32("length", y.len())?,
                alpha,
                y_offset: y.offset_u32()?,
                ..Default::default()
            },
        );
        let groups = workgroup_count(y.len())?;
        self.submit(
            "scale",
            &[],
            &[Step::new(&kernels::SCALE, vec![&params, y.buffer()], groups)],
        )
        .await
    }

    pub(crate) async fn axpby_vector(
        &self,
        alpha: f32,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<()> {
        check_len("y", x.len(), y.len())?;
        let params = self.uniform(
            "axpby_params",
            &ScalarParams {
                n: count_u32("length", x.len())?,
                alpha,
                beta,
                x_offset: x.offset_u32()?,
                y_offset: y.offset_u32()?,
                _pad: [0; 3],
            },
        );
        let groups = workgroup_count(x.len())?;
        self.submit(
            "axpby",
            &[],
            &[Step::new(&kernels::AXPBY, vec![&params, x.buffer(), y.buffer()], groups)],
        )
        .await
    }

    pub(crate) async fn elementwise_vector(
        &self,
        op: ElementwiseOp,
        x: &GpuVector,
        y: &GpuVector,
        z: &mut GpuVector,
    ) -> Result<()> {
        check_len("y", x.len(), y.len())?;
        check_len("z", x.len(), z.len())?;
        let params = self.uniform(
            "elementwise_params",
            &OpParams {
                n: count_u32("length", x.len())?,
                op: op.code(),
                x_offset: x.offset_u32()?,
                y_offset: y.offset_u32()?,
                z_offset: z.offset_u32()?,
                _pad: [0; 3],
            },
        );
        let groups = workgroup_count(x.len())?;
        self.submit(
            "elementwise",
            &[],
            &[Step::new(
                &kernels::ELEMENTWISE,
                vec![&params, x.buffer(), y.buffer(), z.buffer()],
                groups,
            )],
        )
        .await
    }

    /// Two-pass reduction of `x` (and `y` for dot products) into `out`.
    pub(crate) async fn reduce_into(
        &self,
        mode: ReduceMode,
        x: &GpuVector,
        y: Option<&GpuVector>,
        out: &GpuScalar,
    ) -> Result<()> {
        let y = match y {
            Some(y) => {
                check_len("y", x.len(), y.len())?;
                y
            }
            None => x,
        };
        let groups = workgroup_count(x.len())?;
        let partials = self.context.create_empty_buffer(
            "reduce_partials",
            groups as u64 * std::mem::size_of::<f32>() as u64,
            wgpu::BufferUsages::STORAGE,
        );
        let first = self.uniform(
            "reduce_partial_params",
            &ReducePartialParams {
                n: count_u32("length", x.len())?,
                mode: mode.code(),
                groups,
                x_offset: x.offset_u32()?,
                y_offset: y.offset_u32()?,
                _pad: [0; 3],
            },
        );
        let second = self.uniform(
            "reduce_final_params",
            &ReduceFinalParams {
                count: groups,
                finish: u32::from(mode == ReduceMode::Norm2),
                out_index: out.index,
                _pad: 0,
            },
        );
        self.submit(
            "reduce",
            &[],
            &[
                Step::new(
                    &kernels::REDUCE_PARTIAL,
                    vec![&first, x.buffer(), y.buffer(), &partials],
                    groups,
                ),
                Step::new(
                    &kernels::REDUCE_FINAL,
                    vec![&second, &partials, &*out.buffer],
                    1,
                ),
            ],
        )
        .await
    }

    pub(crate) async fn csrmv_matrix(
        &self,
        alpha: f32,
        a: &GpuCsrMatrix,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<()> {
        check_len("x", a.cols(), x.len())?;
        check_len("y", a.rows(), y.len())?;
        let rows = count_u32("rows", a.rows())?;

        let Some(blocks) = &a.row_blocks else {
            let params = self.uniform(
                "csrmv_rows_params",
                &ScalarParams {
                    n: rows,
                    alpha,
                    beta,
                    x_offset: x.offset_u32()?,
                    y_offset: y.offset_u32()?,
                    _pad: [0; 3],
                },
            );
            let groups = workgroup_count(a.rows())?;
            return self
                .submit(
                    "csrmv_rows",
                    &[],
                    &[Step::new(
                        &kernels::CSRMV_ROWS,
                        vec![
                            &params,
                            &a.row_offsets,
                            &a.col_indices,
                            &a.values,
                            x.buffer(),
                            y.buffer(),
                        ],
                        groups,
                    )],
                )
                .await;
        };

        if blocks.count == 0 {
            return Err(SparseError::InvalidArgument(
                "Matrix carries row block metadata with zero blocks".to_string(),
            ));
        }
        let adaptive = self.uniform(
            "csrmv_adaptive_params",
            &AdaptiveParams {
                blocks: blocks.count,
                capacity: blocks.capacity,
                alpha,
                beta,
                rows_for_vector: blocks.rows_for_vector,
                x_offset: x.offset_u32()?,
                y_offset: y.offset_u32()?,
                _pad: 0,
            },
        );
        let finalize = self.uniform(
            "csrmv_finalize_params",
            &ScalarParams {
                n: blocks.split_count,
                alpha,
                beta,
                y_offset: y.offset_u32()?,
                ..Default::default()
            },
        );
        let partials = [&blocks.partials];
        let clears: &[&wgpu::Buffer] = if blocks.split_count > 0 { &partials } else { &[] };
        self.submit(
            "csrmv_adaptive",
            clears,
            &[
                Step::new(
                    &kernels::CSRMV_ADAPTIVE,
                    vec![
                        &adaptive,
                        &a.row_offsets,
                        &a.col_indices,
                        &a.values,
                        x.buffer(),
                        &blocks.descriptors,
                        y.buffer(),
                        &blocks.partials,
                    ],
                    blocks.count,
                ),
                Step::new(
                    &kernels::CSRMV_FINALIZE,
                    vec![&finalize, &blocks.split_rows, &blocks.partials, y.buffer()],
                    workgroup_count(blocks.split_count as usize)?,
                ),
            ],
        )
        .await
    }

    pub(crate) async fn coomv_matrix(
        &self,
        alpha: f32,
        a: &GpuCooMatrix,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<()> {
        check_len("x", a.cols(), x.len())?;
        check_len("y", a.rows(), y.len())?;
        let n = count_u32("rows", a.rows())?;
        // beta == 0 must not read y, so the prescale becomes a fill.
        let kernel = if beta == 0.0 { &kernels::FILL } else { &kernels::SCALE };
        let prescale = self.uniform(
            "coomv_prescale_params",
            &ScalarParams {
                n,
                alpha: beta,
                y_offset: y.offset_u32()?,
                ..Default::default()
            },
        );
        let accumulate = self.uniform(
            "coomv_accumulate_params",
            &ScalarParams {
                n: count_u32("nnz", a.nnz())?,
                alpha,
                x_offset: x.offset_u32()?,
                y_offset: y.offset_u32()?,
                ..Default::default()
            },
        );
        self.submit(
            "coomv",
            &[],
            &[
                Step::new(kernel, vec![&prescale, y.buffer()], workgroup_count(a.rows())?),
                Step::new(
                    &kernels::COOMV_ACCUMULATE,
                    vec![
                        &accumulate,
                        &a.row_indices,
                        &a.col_indices,
                        &a.values,
                        x.buffer(),
                        y.buffer(),
                    ],
                    workgroup_count(a.nnz())?,
                ),
            ],
        )
        .await
    }

    pub(crate) async fn extract_diagonal_matrix(
        &self,
        a: &GpuCsrMatrix,
        out: &mut GpuVector,
    ) -> Result<()> {
        check_len("diagonal", a.rows(), out.len())?;
        let params = self.uniform(
            "extract_diagonal_params",
            &ScalarParams {
                n: count_u32("rows", a.rows())?,
                y_offset: out.offset_u32()?,
                ..Default::default()
            },
        );
        self.submit(
            "extract_diagonal",
            &[],
            &[Step::new(
                &kernels::EXTRACT_DIAGONAL,
                vec![&params, &a.row_offsets, &a.col_indices, &a.values, out.buffer()],
                workgroup_count(a.rows())?,
            )],
        )
        .await
    }
}
