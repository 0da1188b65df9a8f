use std::rc::Rc;

use ash::vk;

use crate::descriptor::references::{DescriptorRefs, Tracked};
use crate::resource::ObjectId;

/// Represents a vulkan sampler object. The native sampler is owned externally.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Sampler {
    id: ObjectId,
    handle: vk::Sampler,
    #[derivative(Debug = "ignore")]
    refs: DescriptorRefs,
}

impl Sampler {
    /// Wrap an externally owned `VkSampler`.
    pub fn new(handle: vk::Sampler) -> Rc<Self> {
        let sampler = Rc::new(Self {
            id: ObjectId::next(),
            handle,
            refs: DescriptorRefs::default(),
        });
        #[cfg(feature = "log-objects")]
        trace!("Tracking VkSampler {:p} as {:?}", sampler.handle, sampler.id);
        sampler
    }

    /// Unique id of this sampler.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub unsafe fn handle(&self) -> vk::Sampler {
        self.handle
    }

    /// Number of descriptor set slots this sampler may still be referenced from.
    pub fn descriptor_references(&self) -> usize {
        self.refs.len()
    }
}

impl Tracked for Sampler {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn descriptor_refs(&self) -> &DescriptorRefs {
        &self.refs
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Releasing VkSampler {:p}", self.handle);
        self.refs.clear(self.id);
    }
}
