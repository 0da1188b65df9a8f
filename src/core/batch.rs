//! Interface to the command recording and submission layer.
//!
//! The descriptor cache does not track GPU work itself. Instead it asks a [`BatchTracker`] which descriptor sets
//! are still in use by outstanding work, and registers everything it binds with the batch currently being recorded.
//! When a batch retires, the owner of the cache hands the set references it held back through
//! [`DescriptorCache::release_sets`](crate::DescriptorCache::release_sets).

use std::rc::Rc;

use anyhow::Result;
use ash::vk;

use crate::descriptor::barrier::DescriptorBarrier;
use crate::descriptor::descriptor_set::SetHandle;
use crate::pipeline::ProgramId;
use crate::resource::image::{ImageView, SamplerView};
use crate::resource::Resource;
use crate::sampler::Sampler;

/// Objects that are referenced by descriptors and must stay alive until the batch that uses them retires.
#[derive(Debug, Clone)]
pub enum TrackedObject {
    /// A sampled image or uniform texel buffer view.
    SamplerView(Rc<SamplerView>),
    /// A sampler used together with a sampler view.
    Sampler(Rc<Sampler>),
    /// A storage image or storage texel buffer view.
    ImageView(Rc<ImageView>),
}

/// The command recording layer, as seen by the descriptor cache.
pub trait BatchTracker {
    /// Register a descriptor set with the batch currently being recorded. Returns `true` if the set was not yet
    /// referenced by this batch. The batch then holds one reference to the set, which must be handed back through
    /// [`DescriptorCache::release_sets`](crate::DescriptorCache::release_sets) once the batch retires.
    fn register_set(&mut self, set: SetHandle) -> bool;

    /// Whether any outstanding (recorded or submitted, but not retired) work still references this set.
    fn is_referenced(&self, set: SetHandle) -> bool;

    /// Register a resource with the current batch, as read-only or written.
    fn reference_resource(&mut self, resource: &Rc<Resource>, write: bool);

    /// Keep a view or sampler alive until the current batch retires.
    fn reference_object(&mut self, object: TrackedObject);

    /// Keep a program alive until the current batch retires.
    fn keep_alive(&mut self, program: ProgramId);

    /// Record a barrier for a resource accessed through a descriptor.
    fn resource_barrier(&mut self, resource: &Rc<Resource>, barrier: &DescriptorBarrier);

    /// Command buffer that descriptor sets should be bound to. Graphics work may be recorded inside a render pass.
    fn command_buffer(&mut self, is_compute: bool) -> vk::CommandBuffer;

    /// Flush the current batch and block until all outstanding work on the device has completed.
    /// Returns every descriptor set reference that was held by the retired batches.
    fn wait_for_idle(&mut self) -> Result<Vec<SetHandle>>;
}
