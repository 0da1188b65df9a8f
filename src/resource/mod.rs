//! Exposes the objects descriptors can refer to: buffers and images ([`Resource`]), sampled views ([`SamplerView`]),
//! storage views ([`ImageView`]) and [`Sampler`](crate::Sampler)s.
//!
//! Creation and destruction of the native objects is not handled here. These types wrap externally owned handles
//! and carry the bookkeeping the descriptor cache needs: a unique [`ObjectId`] and a list of back-references to every
//! descriptor set slot the object was written into. Dropping an object invalidates exactly those descriptor sets.

use std::cell::Cell;
use std::num::NonZeroU64;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

use crate::descriptor::references::{DescriptorRefs, Tracked};

pub mod image;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an object that can be bound to a descriptor. Ids are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        let raw = NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed);
        // The counter starts at one and a u64 does not wrap in practice.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Get the raw value of this id.
    pub fn raw(&self) -> u64 {
        self.0.get()
    }
}

/// The native object behind a [`Resource`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceHandle {
    /// A [`VkBuffer`](vk::Buffer).
    Buffer(vk::Buffer),
    /// A [`VkImage`](vk::Image).
    Image(vk::Image),
}

/// A buffer or image that can be accessed through descriptors.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Resource {
    id: ObjectId,
    handle: ResourceHandle,
    persistent_maps: Cell<u32>,
    storage_image_bound: Cell<bool>,
    #[derivative(Debug = "ignore")]
    refs: DescriptorRefs,
}

impl Resource {
    fn new(handle: ResourceHandle) -> Rc<Self> {
        let resource = Rc::new(Self {
            id: ObjectId::next(),
            handle,
            persistent_maps: Cell::new(0),
            storage_image_bound: Cell::new(false),
            refs: DescriptorRefs::default(),
        });
        #[cfg(feature = "log-objects")]
        trace!("Tracking resource {:?} as {:?}", resource.handle, resource.id);
        resource
    }

    /// Wrap an externally owned buffer.
    pub fn buffer(handle: vk::Buffer) -> Rc<Self> {
        Self::new(ResourceHandle::Buffer(handle))
    }

    /// Wrap an externally owned image.
    pub fn image(handle: vk::Image) -> Rc<Self> {
        Self::new(ResourceHandle::Image(handle))
    }

    /// Unique id of this resource.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Whether this resource is a buffer.
    pub fn is_buffer(&self) -> bool {
        matches!(self.handle, ResourceHandle::Buffer(_))
    }

    /// The native handle of this resource.
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// The buffer handle of this resource, or a null handle if this is an image.
    pub fn buffer_handle(&self) -> vk::Buffer {
        match self.handle {
            ResourceHandle::Buffer(buffer) => buffer,
            ResourceHandle::Image(_) => vk::Buffer::null(),
        }
    }

    /// Register a persistent mapping of this resource. Resources with persistent mappings are reported back
    /// from [`DescriptorCache::update_and_bind`](crate::DescriptorCache::update_and_bind) whenever they are used.
    pub fn map_persistent(&self) {
        self.persistent_maps.set(self.persistent_maps.get() + 1);
    }

    /// Remove a persistent mapping added with [`Resource::map_persistent`].
    pub fn unmap_persistent(&self) {
        self.persistent_maps.set(self.persistent_maps.get().saturating_sub(1));
    }

    /// Amount of persistent mappings of this resource.
    pub fn persistent_maps(&self) -> u32 {
        self.persistent_maps.get()
    }

    /// Whether this image was ever bound as a storage image. Sampled views of such images are read in the `GENERAL` layout.
    pub fn storage_image_bound(&self) -> bool {
        self.storage_image_bound.get()
    }

    pub(crate) fn mark_storage_image_bound(&self) {
        self.storage_image_bound.set(true);
    }

    /// Number of descriptor set slots this resource may still be referenced from. Stale entries are only dropped
    /// when the list grows, so this is an upper bound.
    pub fn descriptor_references(&self) -> usize {
        self.refs.len()
    }
}

impl Tracked for Resource {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn descriptor_refs(&self) -> &DescriptorRefs {
        &self.refs
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Releasing resource {:?}", self.id);
        self.refs.clear(self.id);
    }
}
