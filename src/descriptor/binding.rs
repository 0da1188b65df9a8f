//! Interface to the binding state of the context: what is currently bound to every slot of every shader stage.

use std::rc::Rc;

use ash::vk;

use crate::descriptor::DescriptorType;
use crate::pipeline::ShaderStage;
use crate::resource::image::{ImageView, SamplerView};
use crate::resource::Resource;
use crate::sampler::Sampler;

/// A buffer range bound as uniform or storage buffer.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// The bound buffer.
    pub resource: Rc<Resource>,
    /// Offset of the range inside the buffer. For dynamic uniform buffers, this becomes the dynamic offset.
    pub offset: vk::DeviceSize,
    /// Size of the range.
    pub size: vk::DeviceSize,
    /// Whether shaders may write to this buffer. Only meaningful for storage buffers.
    pub writable: bool,
}

/// A sampler view bound together with its sampler.
#[derive(Debug, Clone)]
pub struct SampledBinding {
    /// The bound view.
    pub view: Rc<SamplerView>,
    /// The sampler to sample the view with. Texel buffers have no sampler.
    pub sampler: Option<Rc<Sampler>>,
}

/// The current binding state, as seen by the descriptor cache.
///
/// Every `(stage, type)` pair has an opaque descriptor state value. Two binding states must produce equal values
/// for a pair exactly when everything bound for that type on that stage is equal. A value of zero means
/// nothing is bound.
pub trait BindingSource {
    /// Opaque descriptor state for one descriptor type of one stage.
    fn descriptor_state(&self, stage: ShaderStage, ty: DescriptorType) -> u32;

    /// Uniform buffer bound at `index`.
    fn uniform_buffer(&self, stage: ShaderStage, index: u32) -> Option<BufferBinding>;

    /// Storage buffer bound at `index`.
    fn storage_buffer(&self, stage: ShaderStage, index: u32) -> Option<BufferBinding>;

    /// Sampler view and sampler bound at `index`.
    fn sampler_view(&self, stage: ShaderStage, index: u32) -> Option<SampledBinding>;

    /// Storage image view bound at `index`.
    fn image_view(&self, stage: ShaderStage, index: u32) -> Option<Rc<ImageView>>;
}
