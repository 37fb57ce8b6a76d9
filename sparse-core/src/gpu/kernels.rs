//! Compute kernels, their binding layouts, and the pipeline cache.

use crate::error::{Result, SparseError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Threads per workgroup in every shader.
pub(crate) const WORKGROUP_SIZE: u32 = 256;

/// Largest workgroup count per dispatch dimension.
const MAX_WORKGROUPS_PER_DIM: u32 = 65535;

/// How a binding is declared in the shader, in binding-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Uniform,
    Read,
    ReadWrite,
}

#[derive(Debug)]
pub(crate) struct Kernel {
    pub(crate) name: &'static str,
    pub(crate) source: &'static str,
    pub(crate) slots: &'static [Slot],
}

use Slot::{Read, ReadWrite, Uniform};

pub(crate) const FILL: Kernel = Kernel {
    name: "fill",
    source: include_str!("shaders/fill.wgsl"),
    slots: &[Uniform, ReadWrite],
};

pub(crate) const SCALE: Kernel = Kernel {
    name: "scale",
    source: include_str!("shaders/scale.wgsl"),
    slots: &[Uniform, ReadWrite],
};

pub(crate) const AXPBY: Kernel = Kernel {
    name: "axpby",
    source: include_str!("shaders/axpby.wgsl"),
    slots: &[Uniform, Read, ReadWrite],
};

pub(crate) const ELEMENTWISE: Kernel = Kernel {
    name: "elementwise",
    source: include_str!("shaders/elementwise.wgsl"),
    slots: &[Uniform, Read, Read, ReadWrite],
};

pub(crate) const REDUCE_PARTIAL: Kernel = Kernel {
    name: "reduce_partial",
    source: include_str!("shaders/reduce_partial.wgsl"),
    slots: &[Uniform, Read, Read, ReadWrite],
};

pub(crate) const REDUCE_FINAL: Kernel = Kernel {
    name: "reduce_final",
    source: include_str!("shaders/reduce_final.wgsl"),
    slots: &[Uniform, Read, ReadWrite],
};

pub(crate) const CSRMV_ROWS: Kernel = Kernel {
    name: "csrmv_rows",
    source: include_str!("shaders/csrmv_rows.wgsl"),
    slots: &[Uniform, Read, Read, Read, Read, ReadWrite],
};

pub(crate) const CSRMV_ADAPTIVE: Kernel = Kernel {
    name: "csrmv_adaptive",
    source: include_str!("shaders/csrmv_adaptive.wgsl"),
    slots: &[Uniform, Read, Read, Read, Read, Read, ReadWrite, ReadWrite],
};

pub(crate) const CSRMV_FINALIZE: Kernel = Kernel {
    name: "csrmv_finalize",
    source: include_str!("shaders/csrmv_finalize.wgsl"),
    slots: &[Uniform, Read, Read, ReadWrite],
};

pub(crate) const COOMV_ACCUMULATE: Kernel = Kernel {
    name: "coomv_accumulate",
    source: include_str!("shaders/coomv_accumulate.wgsl"),
    slots: &[Uniform, Read, Read, Read, Read, ReadWrite],
};

pub(crate) const EXTRACT_DIAGONAL: Kernel = Kernel {
    name: "extract_diagonal",
    source: include_str!("shaders/extract_diagonal.wgsl"),
    slots: &[Uniform, Read, Read, Read, ReadWrite],
};

/// Splits `groups` workgroups over two dimensions when one is not enough.
/// Shaders linearise the id as `x + y * num_workgroups.x` and discard the
/// overshoot.
pub(crate) fn dispatch_dims(groups: u32) -> (u32, u32) {
    if groups <= MAX_WORKGROUPS_PER_DIM {
        (groups, 1)
    } else {
        (MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM))
    }
}

/// Workgroups needed to give each of `n` items its own thread.
pub(crate) fn workgroup_count(n: usize) -> Result<u32> {
    u32::try_from(n.div_ceil(WORKGROUP_SIZE as usize)).map_err(|_| {
        SparseError::InvalidArgument(format!("{} elements exceed the dispatch range", n))
    })
}

#[derive(Debug)]
pub(crate) struct CachedPipeline {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: wgpu::BindGroupLayout,
}

/// Compiles each kernel once per device and hands out shared pipelines.
#[derive(Debug)]
pub(crate) struct PipelineCache {
    device: Arc<wgpu::Device>,
    pipelines: Mutex<HashMap<&'static str, Arc<CachedPipeline>>>,
}

impl PipelineCache {
    pub(crate) fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, kernel: &Kernel) -> Result<Arc<CachedPipeline>> {
        let mut pipelines = self
            .pipelines
            .lock()
            .map_err(|_| SparseError::Internal("Pipeline cache lock poisoned".to_string()))?;
        if let Some(cached) = pipelines.get(kernel.name) {
            return Ok(cached.clone());
        }
        log::debug!("Compiling compute pipeline '{}'", kernel.name);
        let cached = Arc::new(self.build(kernel));
        pipelines.insert(kernel.name, cached.clone());
        Ok(cached)
    }

    fn build(&self, kernel: &Kernel) -> CachedPipeline {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel.name),
                source: wgpu::ShaderSource::Wgsl(kernel.source.into()),
            });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = kernel
            .slots
            .iter()
            .enumerate()
            .map(|(binding, slot)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match slot {
                        Slot::Uniform => wgpu::BufferBindingType::Uniform,
                        Slot::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Slot::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(kernel.name),
                entries: &entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(kernel.name),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        CachedPipeline { pipeline, layout }
    }
}

/// One compute dispatch: a kernel, its buffers in binding order, and the
/// number of workgroups.
pub(crate) struct Step<'a> {
    pub(crate) kernel: &'static Kernel,
    pub(crate) buffers: Vec<&'a wgpu::Buffer>,
    pub(crate) groups: u32,
}

impl<'a> Step<'a> {
    pub(crate) fn new(kernel: &'static Kernel, buffers: Vec<&'a wgpu::Buffer>, groups: u32) -> Self {
        Self {
            kernel,
            buffers,
            groups,
        }
    }
}
