pub use ash::vk;

pub use crate::core::batch::{BatchTracker, TrackedObject};
pub use crate::core::device::DescriptorDevice;
pub use crate::core::error::Error;
pub use crate::core::settings::*;

pub use crate::descriptor::barrier::DescriptorBarrier;
pub use crate::descriptor::binding::{BindingSource, BufferBinding, SampledBinding};
pub use crate::descriptor::cache::{DescriptorCache, SetLookup};
pub use crate::descriptor::descriptor_pool::{DescriptorPool, PoolId};
pub use crate::descriptor::descriptor_set::{DescriptorContents, DescriptorSet, DescriptorStateKey, DescriptorWrite, SetHandle};
pub use crate::descriptor::DescriptorType;

pub use crate::pipeline::{Program, ProgramId, ShaderBinding, ShaderInfo, ShaderStage, GRAPHICS_STAGE_COUNT};

pub use crate::resource::image::{ImageView, SamplerView, ViewHandle};
pub use crate::resource::{ObjectId, Resource, ResourceHandle};
pub use crate::sampler::Sampler;

pub use crate::util::deferred_delete::{DeletionQueue, InFlight};
