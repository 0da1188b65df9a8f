//! The pipeline module exposes [`Program`], the descriptor-side view of a graphics or compute pipeline.
//!
//! A program owns references to one descriptor pool per [`DescriptorType`] it uses, remembers the last
//! descriptor set it used for each of them, and owns the pipeline layout built from the pools' set layouts.
//! Programs are created and destroyed through the [`DescriptorCache`](crate::DescriptorCache):
//!
//! ```ignore
//! let program = cache.create_program(vec![vertex_info, fragment_info], false)?;
//! // ... record draws using `cache.update_and_bind(&mut program, &mut batch, &bindings)?`
//! cache.destroy_program(program);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

use crate::descriptor::descriptor_pool::PoolId;
use crate::descriptor::descriptor_set::SetId;
use crate::descriptor::DescriptorType;

pub mod shader;

pub use shader::{ShaderBinding, ShaderInfo, ShaderStage, GRAPHICS_STAGE_COUNT};

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a program, for example to keep it alive in a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

impl ProgramId {
    fn next() -> Self {
        Self(NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value of this id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A graphics or compute program, as far as descriptors are concerned.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    is_compute: bool,
    shaders: Vec<ShaderInfo>,
    pub(crate) pools: [Option<PoolId>; DescriptorType::COUNT],
    pub(crate) last_set: [Option<SetId>; DescriptorType::COUNT],
    pub(crate) layout: vk::PipelineLayout,
}

impl Program {
    pub(crate) fn new(mut shaders: Vec<ShaderInfo>, is_compute: bool) -> Self {
        shaders.sort_by_key(|shader| shader.stage());
        Self {
            id: ProgramId::next(),
            is_compute,
            shaders,
            pools: [None; DescriptorType::COUNT],
            last_set: [None; DescriptorType::COUNT],
            layout: vk::PipelineLayout::null(),
        }
    }

    /// Unique id of this program.
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Whether this is a compute program.
    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    /// All shaders of this program, sorted by stage.
    pub fn shaders(&self) -> &[ShaderInfo] {
        self.shaders.as_slice()
    }

    /// The descriptor pool used for a descriptor type, if this program uses that type.
    pub fn pool(&self, ty: DescriptorType) -> Option<PoolId> {
        self.pools[ty.index()]
    }

    /// Pipeline bind point for this program.
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        if self.is_compute {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        }
    }

    /// Get unsafe access to the pipeline layout of this program.
    /// # Safety
    /// The layout is owned by the program and destroyed by [`DescriptorCache::destroy_program`](crate::DescriptorCache::destroy_program).
    pub unsafe fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}
