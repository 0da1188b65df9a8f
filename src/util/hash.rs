//! Hashing and comparison of native structs that do not implement [`Hash`] and [`Eq`] themselves.

use std::hash::{Hash, Hasher};

use ash::vk;

use crate::descriptor::DescriptorType;

/// Wrapper that hashes and compares the value fields of a
/// [`VkDescriptorSetLayoutBinding`](vk::DescriptorSetLayoutBinding). Immutable samplers are not supported and are
/// ignored.
pub(crate) struct SetLayoutBinding<'a>(pub &'a vk::DescriptorSetLayoutBinding);

impl Hash for SetLayoutBinding<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.binding.hash(state);
        self.0.descriptor_type.hash(state);
        self.0.descriptor_count.hash(state);
        self.0.stage_flags.hash(state);
    }
}

impl PartialEq for SetLayoutBinding<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.binding == other.0.binding
            && self.0.descriptor_type == other.0.descriptor_type
            && self.0.descriptor_count == other.0.descriptor_count
            && self.0.stage_flags == other.0.stage_flags
    }
}

/// Wrapper that hashes and compares a [`VkDescriptorPoolSize`](vk::DescriptorPoolSize).
pub(crate) struct PoolSize<'a>(pub &'a vk::DescriptorPoolSize);

impl Hash for PoolSize<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.ty.hash(state);
        self.0.descriptor_count.hash(state);
    }
}

impl PartialEq for PoolSize<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.ty == other.0.ty && self.0.descriptor_count == other.0.descriptor_count
    }
}

/// Key under which descriptor pools are shared. Two programs share a pool for a descriptor type when the layout
/// bindings, the pool sizes and the binding state indices read by those bindings are all equal.
#[derive(Debug, Clone)]
pub(crate) struct PoolKey {
    ty: DescriptorType,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    sizes: Vec<vk::DescriptorPoolSize>,
    indices: Vec<u32>,
}

impl PoolKey {
    pub fn new(ty: DescriptorType, bindings: &[vk::DescriptorSetLayoutBinding], sizes: &[vk::DescriptorPoolSize], indices: &[u32]) -> Self {
        Self {
            ty,
            bindings: bindings.to_vec(),
            sizes: sizes.to_vec(),
            indices: indices.to_vec(),
        }
    }
}

impl Hash for PoolKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.bindings.len().hash(state);
        self.bindings.iter().for_each(|binding| SetLayoutBinding(binding).hash(state));
        self.sizes.len().hash(state);
        self.sizes.iter().for_each(|size| PoolSize(size).hash(state));
        self.indices.hash(state);
    }
}

impl PartialEq for PoolKey {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.indices == other.indices
            && self.bindings.len() == other.bindings.len()
            && self.sizes.len() == other.sizes.len()
            && self
                .bindings
                .iter()
                .zip(&other.bindings)
                .all(|(a, b)| SetLayoutBinding(a) == SetLayoutBinding(b))
            && self.sizes.iter().zip(&other.sizes).all(|(a, b)| PoolSize(a) == PoolSize(b))
    }
}

impl Eq for PoolKey {}

/// Fold a 64 bit hash into 32 bits.
pub(crate) fn fold_u64(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}
