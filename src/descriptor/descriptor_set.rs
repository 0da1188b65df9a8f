//! Descriptor set instances and the binding state keys they are cached under.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ash::vk;

use crate::descriptor::barrier::DescriptorBarrier;
use crate::descriptor::descriptor_pool::PoolId;
use crate::descriptor::references::{SetSlots, SlotKind};
use crate::pipeline::GRAPHICS_STAGE_COUNT;
use crate::resource::ObjectId;
use crate::util::hash::fold_u64;

/// Index of a descriptor set inside its pool.
pub(crate) type SetId = u32;

/// Refers to a single descriptor set of a pool owned by a [`DescriptorCache`](crate::DescriptorCache).
/// Handles stay valid until the pool is destroyed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetHandle {
    pool: PoolId,
    set: SetId,
}

impl SetHandle {
    pub(crate) fn new(pool: PoolId, set: SetId) -> Self {
        Self {
            pool,
            set,
        }
    }

    /// The pool this set was allocated from.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Index of this set inside its pool.
    pub fn index(&self) -> u32 {
        self.set
    }
}

/// Snapshot of the descriptor state of every stage for one descriptor type, together with its hash.
///
/// Compute programs only use the first state. Equality compares all states, hashing only uses the precomputed hash.
/// A hash of zero is reserved for the null key, which is used by pools without any bindings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DescriptorStateKey {
    hash: u32,
    states: [u32; GRAPHICS_STAGE_COUNT],
}

impl DescriptorStateKey {
    /// Key of the null set.
    pub const NULL: DescriptorStateKey = DescriptorStateKey {
        hash: 0,
        states: [0; GRAPHICS_STAGE_COUNT],
    };

    /// Create a key from per-stage descriptor states. Zero states are skipped when hashing. The resulting hash is
    /// never zero.
    pub fn new(states: [u32; GRAPHICS_STAGE_COUNT]) -> Self {
        let mut hasher = DefaultHasher::new();
        for (stage, state) in states.iter().enumerate().filter(|(_, state)| **state != 0) {
            stage.hash(&mut hasher);
            state.hash(&mut hasher);
        }
        let hash = match fold_u64(hasher.finish()) {
            0 => 1,
            hash => hash,
        };
        Self {
            hash,
            states,
        }
    }

    /// The precomputed hash of this key.
    pub fn hash_value(&self) -> u32 {
        self.hash
    }

    /// Per-stage states of this key.
    pub fn states(&self) -> &[u32; GRAPHICS_STAGE_COUNT] {
        &self.states
    }

    /// Whether this is the null key.
    pub fn is_null(&self) -> bool {
        self.hash == 0
    }
}

impl Hash for DescriptorStateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

/// A native descriptor set together with its cache state.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DescriptorSet {
    handle: vk::DescriptorSet,
    pub(crate) hash: u32,
    pub(crate) key: DescriptorStateKey,
    pub(crate) recycled: bool,
    pub(crate) spare: bool,
    pub(crate) refcount: u32,
    #[derivative(Debug = "ignore")]
    pub(crate) slots: Rc<SetSlots>,
    pub(crate) barriers: Vec<DescriptorBarrier>,
}

impl DescriptorSet {
    pub(crate) fn new(handle: vk::DescriptorSet, resource_count: usize, with_samplers: bool) -> Self {
        Self {
            handle,
            hash: 0,
            key: DescriptorStateKey::NULL,
            recycled: false,
            spare: false,
            refcount: 1,
            slots: Rc::new(SetSlots::new(resource_count, with_samplers)),
            barriers: Vec::new(),
        }
    }

    /// Get unsafe access to the underlying `VkDescriptorSet` object.
    /// # Safety
    /// The set is owned by its pool and may be rewritten once it is recycled.
    pub unsafe fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Hash of the binding state this set currently represents. Zero for null sets and sets that are not keyed.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// The binding state this set was last written for.
    pub fn key(&self) -> &DescriptorStateKey {
        &self.key
    }

    /// Whether the contents of this set no longer match a live binding state.
    pub fn is_invalid(&self) -> bool {
        self.slots.is_invalid()
    }

    /// Whether this set currently sits in the free index of its pool.
    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    /// Number of references to this set. The pool holds one, every batch using the set holds another.
    pub fn reference_count(&self) -> u32 {
        self.refcount
    }

    /// Barriers required before the resources of this set can be accessed.
    pub fn barriers(&self) -> &[DescriptorBarrier] {
        self.barriers.as_slice()
    }

    /// The object written into a slot. Slots are numbered by walking all bindings of all stages in order.
    pub fn bound_object(&self, slot: usize) -> Option<ObjectId> {
        self.slots.get(SlotKind::Object, slot)
    }

    /// The sampler written into a slot of a sampler view set.
    pub fn bound_sampler(&self, slot: usize) -> Option<ObjectId> {
        self.slots.get(SlotKind::Sampler, slot)
    }

    /// Number of object slots of this set.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop this set from caching: clear its hash and mark it invalid. Never touches any index.
    pub(crate) fn invalidate(&mut self) {
        self.hash = 0;
        self.slots.set_invalid(true);
    }
}

/// Contents of a single descriptor write.
#[derive(Debug, Clone)]
pub enum DescriptorContents {
    Buffer(Vec<vk::DescriptorBufferInfo>),
    Image(Vec<vk::DescriptorImageInfo>),
    TexelBuffer(Vec<vk::BufferView>),
}

/// A write of one binding of a descriptor set.
#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub ty: vk::DescriptorType,
    pub contents: DescriptorContents,
}

impl DescriptorWrite {
    /// Number of descriptors written.
    pub fn count(&self) -> u32 {
        let count = match &self.contents {
            DescriptorContents::Buffer(buffers) => buffers.len(),
            DescriptorContents::Image(images) => images.len(),
            DescriptorContents::TexelBuffer(views) => views.len(),
        };
        count as u32
    }
}
