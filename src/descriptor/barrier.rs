//! Barrier deduplication for a single descriptor set update.
//!
//! Every bound resource produces a barrier candidate `(resource, layout, access, stage)`. Candidates for the same
//! resource and layout whose access is already covered by an earlier entry are merged into it by OR-ing their
//! pipeline stages, so a resource bound to several stages or slots ends up as a single barrier.

use std::rc::{Rc, Weak};

use ash::vk;
use multimap::MultiMap;

use crate::resource::{ObjectId, Resource};

/// A barrier required before a resource can be accessed through a descriptor set.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct DescriptorBarrier {
    #[derivative(Debug = "ignore")]
    resource: Weak<Resource>,
    resource_id: ObjectId,
    layout: vk::ImageLayout,
    access: vk::AccessFlags,
    stages: vk::PipelineStageFlags,
}

impl DescriptorBarrier {
    /// The resource this barrier applies to, if it is still alive.
    pub fn resource(&self) -> Option<Rc<Resource>> {
        self.resource.upgrade()
    }

    /// Id of the resource this barrier applies to.
    pub fn resource_id(&self) -> ObjectId {
        self.resource_id
    }

    /// Image layout the resource must be in. `UNDEFINED` for buffers.
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Shader access to the resource.
    pub fn access(&self) -> vk::AccessFlags {
        self.access
    }

    /// All pipeline stages accessing the resource.
    pub fn stages(&self) -> vk::PipelineStageFlags {
        self.stages
    }

    /// Whether the access includes shader writes.
    pub fn is_write(&self) -> bool {
        self.access.contains(vk::AccessFlags::SHADER_WRITE)
    }
}

/// Collects the barriers of one update pass.
#[derive(Debug, Default)]
pub(crate) struct BarrierCollector {
    barriers: Vec<DescriptorBarrier>,
    lookup: MultiMap<(ObjectId, vk::ImageLayout), usize>,
}

impl BarrierCollector {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            barriers: Vec::with_capacity(capacity),
            lookup: MultiMap::with_capacity(capacity),
        }
    }

    /// Add a barrier candidate.
    pub fn add(&mut self, resource: &Rc<Resource>, layout: vk::ImageLayout, access: vk::AccessFlags, stage: vk::PipelineStageFlags) {
        let key = (resource.id(), layout);
        let existing = self
            .lookup
            .get_vec(&key)
            .and_then(|indices| indices.iter().copied().find(|&index| self.barriers[index].access.contains(access)));
        match existing {
            Some(index) => self.barriers[index].stages |= stage,
            None => {
                self.lookup.insert(key, self.barriers.len());
                self.barriers.push(DescriptorBarrier {
                    resource: Rc::downgrade(resource),
                    resource_id: resource.id(),
                    layout,
                    access,
                    stages: stage,
                });
            }
        }
    }

    /// Consume the collector, returning the deduplicated barriers in insertion order.
    pub fn finish(self) -> Vec<DescriptorBarrier> {
        self.barriers
    }
}
