//! Views of a [`Resource`] that are bound through sampler view and storage image descriptors.

use std::rc::Rc;

use ash::vk;

use crate::descriptor::references::{DescriptorRefs, Tracked};
use crate::resource::{ObjectId, Resource};

/// The native view object. Images are viewed through image views, buffers through texel buffer views.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViewHandle {
    /// A [`VkImageView`](vk::ImageView).
    Image(vk::ImageView),
    /// A [`VkBufferView`](vk::BufferView).
    TexelBuffer(vk::BufferView),
}

/// A view of a resource that is sampled from shaders, either a sampled image or a uniform texel buffer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SamplerView {
    id: ObjectId,
    resource: Rc<Resource>,
    handle: ViewHandle,
    #[derivative(Debug = "ignore")]
    refs: DescriptorRefs,
}

impl SamplerView {
    /// Create a sampled view of an image resource.
    pub fn image(resource: Rc<Resource>, view: vk::ImageView) -> Rc<Self> {
        debug_assert!(!resource.is_buffer(), "image view of a buffer resource");
        Self::new(resource, ViewHandle::Image(view))
    }

    /// Create a uniform texel buffer view of a buffer resource.
    pub fn texel_buffer(resource: Rc<Resource>, view: vk::BufferView) -> Rc<Self> {
        debug_assert!(resource.is_buffer(), "texel buffer view of an image resource");
        Self::new(resource, ViewHandle::TexelBuffer(view))
    }

    fn new(resource: Rc<Resource>, handle: ViewHandle) -> Rc<Self> {
        let view = Rc::new(Self {
            id: ObjectId::next(),
            resource,
            handle,
            refs: DescriptorRefs::default(),
        });
        #[cfg(feature = "log-objects")]
        trace!("Tracking sampler view {:?} as {:?}", view.handle, view.id);
        view
    }

    /// Unique id of this view.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The viewed resource.
    pub fn resource(&self) -> &Rc<Resource> {
        &self.resource
    }

    /// The native view handle.
    pub fn handle(&self) -> ViewHandle {
        self.handle
    }

    /// Number of descriptor set slots this view may still be referenced from.
    pub fn descriptor_references(&self) -> usize {
        self.refs.len()
    }
}

impl Tracked for SamplerView {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn descriptor_refs(&self) -> &DescriptorRefs {
        &self.refs
    }
}

impl Drop for SamplerView {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Releasing sampler view {:?}", self.id);
        self.refs.clear(self.id);
    }
}

/// A view of a resource that is bound as storage image or storage texel buffer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ImageView {
    id: ObjectId,
    resource: Rc<Resource>,
    handle: ViewHandle,
    access: vk::AccessFlags,
    #[derivative(Debug = "ignore")]
    refs: DescriptorRefs,
}

impl ImageView {
    /// Create a storage view of an image resource. `access` holds the shader access of this view, a combination of
    /// [`SHADER_READ`](vk::AccessFlags::SHADER_READ) and [`SHADER_WRITE`](vk::AccessFlags::SHADER_WRITE).
    /// Once the view is bound to a descriptor set, sampled views of the image use the `GENERAL` layout.
    pub fn image(resource: Rc<Resource>, view: vk::ImageView, access: vk::AccessFlags) -> Rc<Self> {
        debug_assert!(!resource.is_buffer(), "image view of a buffer resource");
        Self::new(resource, ViewHandle::Image(view), access)
    }

    /// Create a storage texel buffer view of a buffer resource.
    pub fn texel_buffer(resource: Rc<Resource>, view: vk::BufferView, access: vk::AccessFlags) -> Rc<Self> {
        debug_assert!(resource.is_buffer(), "texel buffer view of an image resource");
        Self::new(resource, ViewHandle::TexelBuffer(view), access)
    }

    fn new(resource: Rc<Resource>, handle: ViewHandle, access: vk::AccessFlags) -> Rc<Self> {
        debug_assert!(
            (vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE).contains(access),
            "storage views only support shader read and write access"
        );
        let view = Rc::new(Self {
            id: ObjectId::next(),
            resource,
            handle,
            access,
            refs: DescriptorRefs::default(),
        });
        #[cfg(feature = "log-objects")]
        trace!("Tracking image view {:?} as {:?}", view.handle, view.id);
        view
    }

    /// Unique id of this view.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The viewed resource.
    pub fn resource(&self) -> &Rc<Resource> {
        &self.resource
    }

    /// The native view handle.
    pub fn handle(&self) -> ViewHandle {
        self.handle
    }

    /// Shader access of this view.
    pub fn access(&self) -> vk::AccessFlags {
        self.access
    }

    /// Number of descriptor set slots this view may still be referenced from.
    pub fn descriptor_references(&self) -> usize {
        self.refs.len()
    }
}

impl Tracked for ImageView {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn descriptor_refs(&self) -> &DescriptorRefs {
        &self.refs
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Releasing image view {:?}", self.id);
        self.refs.clear(self.id);
    }
}
