//! This module handles everything related to descriptor sets.
//! It exposes the [`DescriptorCache`](crate::DescriptorCache), which maps the current resource bindings of a
//! [`Program`](crate::Program) to a native descriptor set, avoiding a fresh allocation and write on every draw or dispatch.
//!
//! Descriptors are split into four [`DescriptorType`]s, each with its own descriptor set and pool:
//! uniform buffers, sampler views, storage buffers and storage images.
//!
//! # Caching
//!
//! Each pool keeps two indices keyed by the binding state of all shader stages: an active index holding sets that
//! represent a live binding state, and a free index holding sets that are no longer used by any batch but can be reused
//! for an exact match. Sets that were never keyed yet live on a spare list. Pools grow in buckets whose size increases
//! geometrically with the amount of sets already allocated.
//!
//! Bound objects keep back-references to the descriptor set slots they occupy. Destroying an object invalidates exactly
//! those sets, without ever scanning the cache. Invalidated sets that are still used by the GPU are removed from the cache
//! lazily, the next time a lookup would hit them.
//!
//! # Example
//!
//! ```ignore
//! use deimos::prelude::*;
//!
//! let mut cache = DescriptorCache::new(device.clone(), CacheSettings::default());
//! let mut program = cache.create_program(shaders, false)?;
//! // Once per draw:
//! let persistent = cache.update_and_bind(&mut program, &mut batch, &bindings)?;
//! // Once a batch retired:
//! cache.release_sets(retired_sets);
//! // Once per frame:
//! cache.next_frame();
//! ```

use ash::vk;

pub mod barrier;
pub mod binding;
pub mod cache;
pub mod descriptor_pool;
pub mod descriptor_set;

pub(crate) mod references;
pub(crate) mod update;

/// The four kinds of descriptor sets a program can use. The discriminant is also the set index the descriptor
/// set is bound to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorType {
    /// Uniform buffers, possibly with dynamic offsets.
    UniformBuffer,
    /// Combined image samplers and uniform texel buffers.
    SamplerView,
    /// Storage buffers.
    StorageBuffer,
    /// Storage images and storage texel buffers.
    Image,
}

static_assertions::const_assert_eq!(DescriptorType::COUNT, DescriptorType::ALL.len());

impl DescriptorType {
    /// Number of descriptor types.
    pub const COUNT: usize = 4;
    /// All descriptor types, in set index order.
    pub const ALL: [DescriptorType; 4] = [
        DescriptorType::UniformBuffer,
        DescriptorType::SamplerView,
        DescriptorType::StorageBuffer,
        DescriptorType::Image,
    ];

    /// Index of this type, which is also the descriptor set index it is bound to.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The native descriptor types that belong to this descriptor type.
    pub fn native_types(self) -> &'static [vk::DescriptorType] {
        match self {
            DescriptorType::UniformBuffer => &[vk::DescriptorType::UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC],
            DescriptorType::SamplerView => &[vk::DescriptorType::UNIFORM_TEXEL_BUFFER, vk::DescriptorType::COMBINED_IMAGE_SAMPLER],
            DescriptorType::StorageBuffer => &[vk::DescriptorType::STORAGE_BUFFER],
            DescriptorType::Image => &[vk::DescriptorType::STORAGE_TEXEL_BUFFER, vk::DescriptorType::STORAGE_IMAGE],
        }
    }

    /// Whether a native descriptor type belongs to this descriptor type.
    pub fn accepts(self, ty: vk::DescriptorType) -> bool {
        self.native_types().contains(&ty)
    }

    /// Whether sets of this type also store samplers next to their bound objects.
    pub(crate) fn has_samplers(self) -> bool {
        self == DescriptorType::SamplerView
    }
}
