//! Shader stages and the reflected descriptor bindings of a single shader.

use ash::vk;

use crate::descriptor::DescriptorType;

/// Number of graphics shader stages.
pub const GRAPHICS_STAGE_COUNT: usize = 5;

/// A programmable shader stage. Stages are always walked in the order of this enum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}

impl ShaderStage {
    /// All graphics stages, in walk order.
    pub const GRAPHICS: [ShaderStage; GRAPHICS_STAGE_COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
    ];

    /// Index of this stage inside a per-stage state array. Compute programs only have a single stage,
    /// so compute maps to index zero.
    pub fn state_index(self) -> usize {
        match self {
            ShaderStage::Compute => 0,
            stage => stage as usize,
        }
    }

    /// Whether this is the compute stage.
    pub fn is_compute(self) -> bool {
        self == ShaderStage::Compute
    }

    /// Shader stage flags used in descriptor set layout bindings.
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Pipeline stage in which this shader stage accesses its descriptors. Used for barriers.
    pub fn pipeline_stage(self) -> vk::PipelineStageFlags {
        match self {
            ShaderStage::Vertex => vk::PipelineStageFlags::VERTEX_SHADER,
            ShaderStage::Fragment => vk::PipelineStageFlags::FRAGMENT_SHADER,
            ShaderStage::Geometry => vk::PipelineStageFlags::GEOMETRY_SHADER,
            ShaderStage::TessControl => vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
            ShaderStage::TessEval => vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
            ShaderStage::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

/// A single reflected descriptor binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    /// Binding number inside the descriptor set.
    pub binding: u32,
    /// Native descriptor type of the binding.
    pub ty: vk::DescriptorType,
    /// Array size of the binding.
    pub size: u32,
    /// Index of the first slot this binding reads from in the binding state, e.g. the uniform buffer or
    /// sampler view index.
    pub index: u32,
}

/// Reflection information of one shader: its stage and all of its descriptor bindings, grouped by
/// [`DescriptorType`].
///
/// # Example
/// ```
/// # use deimos::*;
/// # use deimos::vk;
/// let shader = ShaderInfo::new(ShaderStage::Fragment)
///     .with_binding(DescriptorType::UniformBuffer, ShaderBinding {
///         binding: 0,
///         ty: vk::DescriptorType::UNIFORM_BUFFER,
///         size: 1,
///         index: 0,
///     });
/// assert_eq!(shader.bindings(DescriptorType::UniformBuffer).len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ShaderInfo {
    stage: ShaderStage,
    bindings: [Vec<ShaderBinding>; DescriptorType::COUNT],
}

impl ShaderInfo {
    /// Create reflection information for a shader without any bindings.
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            bindings: Default::default(),
        }
    }

    /// Add a binding of the given descriptor type.
    pub fn with_binding(mut self, ty: DescriptorType, binding: ShaderBinding) -> Self {
        debug_assert!(ty.accepts(binding.ty), "{:?} cannot hold a {:?} binding", ty, binding.ty);
        self.bindings[ty.index()].push(binding);
        self
    }

    /// The stage of this shader.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// All bindings of one descriptor type, in reflection order.
    pub fn bindings(&self, ty: DescriptorType) -> &[ShaderBinding] {
        self.bindings[ty.index()].as_slice()
    }
}
