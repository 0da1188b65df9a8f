//! A descriptor pool owns the native pool and set layout for one descriptor type of one or more programs, and all
//! descriptor sets allocated from it. Sets are allocated in buckets and never freed individually. Instead they move
//! between three places:
//! - the active index, holding sets that represent a live binding state,
//! - the free index, holding sets that no batch uses anymore but that still hold valid contents for their key,
//! - the spare list, holding sets without a key.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::device::DescriptorDevice;
use crate::core::error::Error;
use crate::core::settings::CacheSettings;
use crate::descriptor::descriptor_set::{DescriptorSet, DescriptorStateKey, SetId};
use crate::descriptor::DescriptorType;
use crate::util::deferred_delete::InFlight;

/// Identifies a descriptor pool inside a [`DescriptorCache`](crate::DescriptorCache).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub(crate) u32);

impl PoolId {
    /// Get the raw value of this id.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Memory pool for descriptor sets of a single layout.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct DescriptorPool<D: DescriptorDevice> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    id: PoolId,
    ty: DescriptorType,
    handle: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    descriptor_count: u32,
    resource_count: u32,
    max_sets: u32,
    bucket_factor: u32,
    sets: Vec<DescriptorSet>,
    active: HashMap<DescriptorStateKey, SetId>,
    free: HashMap<DescriptorStateKey, SetId>,
    spare: Vec<SetId>,
    null_set: Option<SetId>,
}

impl<D: DescriptorDevice> DescriptorPool<D> {
    /// Create a new descriptor pool with its set layout. If creating either native object fails, nothing is leaked.
    pub(crate) fn new(
        device: Arc<D>,
        id: PoolId,
        ty: DescriptorType,
        bindings: &[vk::DescriptorSetLayoutBinding],
        sizes: &[vk::DescriptorPoolSize],
        settings: &CacheSettings,
    ) -> Result<Self> {
        let layout = unsafe { device.create_set_layout(bindings) }.map_err(|err| {
            error!("Failed to create descriptor set layout for {ty:?}: {err}");
            Error::PoolCreationFailed(ty)
        })?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkDescriptorSetLayout {layout:p}");

        let max_sets = settings.max_sets_per_pool.max(1);
        let handle = match unsafe { device.create_pool(sizes, max_sets) } {
            Ok(handle) => handle,
            Err(err) => {
                error!("Failed to create descriptor pool for {ty:?}: {err}");
                unsafe { device.destroy_set_layout(layout) };
                #[cfg(feature = "log-objects")]
                trace!("Destroyed VkDescriptorSetLayout {layout:p}");
                return Err(Error::PoolCreationFailed(ty).into());
            }
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkDescriptorPool {handle:p}");

        Ok(Self {
            device,
            id,
            ty,
            handle,
            layout,
            descriptor_count: bindings.len() as u32,
            resource_count: bindings.iter().map(|binding| binding.descriptor_count).sum(),
            max_sets,
            bucket_factor: settings.bucket_factor.max(2),
            sets: Vec::new(),
            active: HashMap::new(),
            free: HashMap::new(),
            spare: Vec::new(),
            null_set: None,
        })
    }

    /// Create a null pool. Its layout has a single unused uniform buffer binding so it can fill a gap in the
    /// set indices of a program, but it reports zero bindings and its sets are never written.
    pub(crate) fn new_null(device: Arc<D>, id: PoolId, ty: DescriptorType, settings: &CacheSettings) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE,
            p_immutable_samplers: std::ptr::null(),
        };
        let size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: settings.max_sets_per_pool.max(1),
        };
        let mut pool = Self::new(device, id, ty, &[binding], &[size], settings)?;
        pool.descriptor_count = 0;
        pool.resource_count = 0;
        Ok(pool)
    }

    /// Id of this pool.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// The descriptor type of all sets in this pool.
    pub fn ty(&self) -> DescriptorType {
        self.ty
    }

    /// Number of bindings per set. Zero for null pools.
    pub fn descriptor_count(&self) -> u32 {
        self.descriptor_count
    }

    /// Number of bound objects per set, counting every array element.
    pub fn resource_count(&self) -> u32 {
        self.resource_count
    }

    /// Whether this is a null pool.
    pub fn is_null(&self) -> bool {
        self.descriptor_count == 0
    }

    /// Number of sets allocated from the native pool so far.
    pub fn sets_allocated(&self) -> u32 {
        self.sets.len() as u32
    }

    /// Maximum number of sets this pool will allocate.
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Number of sets in the active index.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of sets in the free index.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of sets on the spare list.
    pub fn spare_len(&self) -> usize {
        self.spare.len()
    }

    /// Whether the active index maps the set's key to this set.
    pub fn is_active(&self, id: u32) -> bool {
        self.sets
            .get(id as usize)
            .map_or(false, |set| self.active.get(&set.key) == Some(&id))
    }

    /// Whether the free index maps the set's key to this set.
    pub fn is_free(&self, id: u32) -> bool {
        self.sets
            .get(id as usize)
            .map_or(false, |set| self.free.get(&set.key) == Some(&id))
    }

    /// Access a set of this pool.
    pub fn set(&self, id: u32) -> Option<&DescriptorSet> {
        self.sets.get(id as usize)
    }

    pub(crate) fn set_mut(&mut self, id: SetId) -> Option<&mut DescriptorSet> {
        self.sets.get_mut(id as usize)
    }

    /// Get unsafe access to the native descriptor set layout.
    /// # Safety
    /// The layout is destroyed together with this pool.
    pub unsafe fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get unsafe access to the native descriptor pool.
    /// # Safety
    /// All sets of this pool become invalid once the pool is dropped.
    pub unsafe fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub(crate) fn null_set(&self) -> Option<SetId> {
        self.null_set
    }

    pub(crate) fn set_null_set(&mut self, id: SetId) {
        self.null_set = Some(id);
    }

    /// Sets this pool may still allocate.
    pub(crate) fn remaining_capacity(&self) -> u32 {
        self.max_sets.saturating_sub(self.sets_allocated())
    }

    /// Whether a lookup could still get a set without waiting: there is capacity left, or a spare or free set.
    pub(crate) fn has_capacity(&self) -> bool {
        self.remaining_capacity() > 0 || !self.spare.is_empty() || !self.free.is_empty()
    }

    /// Size of the next bucket. Null pools allocate a single set. Other pools allocate the largest power of the
    /// bucket factor not exceeding the sets already allocated, at least one factor, capped to the remaining capacity.
    pub(crate) fn bucket_size(&self) -> u32 {
        if self.is_null() {
            return self.remaining_capacity().min(1);
        }
        let used = self.sets_allocated();
        let mut bucket = self.bucket_factor;
        while let Some(next) = bucket.checked_mul(self.bucket_factor) {
            if next > used {
                break;
            }
            bucket = next;
        }
        bucket.min(self.remaining_capacity())
    }

    /// Allocate a new bucket of sets with a single native call. The first set is returned, all others are pushed to
    /// the spare list.
    pub(crate) fn allocate_bucket(&mut self) -> Result<SetId> {
        let count = self.bucket_size();
        if count == 0 {
            return Err(Error::PoolExhausted(self.ty).into());
        }
        self.sets.try_reserve(count as usize).map_err(Error::from)?;
        self.spare.try_reserve(count as usize - 1).map_err(Error::from)?;

        let handles = unsafe { self.device.allocate_sets(self.handle, self.layout, count) }.map_err(|err| {
            error!("Failed to allocate {count} descriptor sets for {:?}: {err}", self.ty);
            Error::from(err)
        })?;
        debug_assert_eq!(handles.len(), count as usize);

        let first = self.sets.len() as SetId;
        let with_samplers = self.ty.has_samplers();
        self.sets.extend(
            handles
                .into_iter()
                .map(|handle| DescriptorSet::new(handle, self.resource_count as usize, with_samplers)),
        );
        let last = self.sets.len() as SetId;
        for id in (first + 1..last).rev() {
            self.sets[id as usize].spare = true;
            self.spare.push(id);
        }
        debug!(
            "Allocated bucket of {} descriptor sets for {:?} pool {:?} ({} / {})",
            last - first,
            self.ty,
            self.id,
            self.sets_allocated(),
            self.max_sets
        );
        Ok(first)
    }

    /// Set in the active index under `key`.
    pub(crate) fn find_active(&self, key: &DescriptorStateKey) -> Option<SetId> {
        self.active.get(key).copied()
    }

    /// Remove and return the set in the free index under `key`.
    pub(crate) fn take_free(&mut self, key: &DescriptorStateKey) -> Option<SetId> {
        let id = self.free.remove(key)?;
        if let Some(set) = self.sets.get_mut(id as usize) {
            set.recycled = false;
        }
        Some(id)
    }

    /// Remove a set from the free index, if it is there under its own key.
    pub(crate) fn remove_free(&mut self, id: SetId) {
        let Some(set) = self.sets.get_mut(id as usize) else {
            return;
        };
        if self.free.get(&set.key) == Some(&id) {
            self.free.remove(&set.key);
        }
        set.recycled = false;
    }

    /// Pop a set from the spare list.
    pub(crate) fn pop_spare(&mut self) -> Option<SetId> {
        let id = self.spare.pop()?;
        if let Some(set) = self.sets.get_mut(id as usize) {
            set.spare = false;
        }
        Some(id)
    }

    fn push_spare(&mut self, id: SetId) {
        let Some(set) = self.sets.get_mut(id as usize) else {
            return;
        };
        set.invalidate();
        set.recycled = false;
        if !set.spare {
            set.spare = true;
            self.spare.push(id);
        }
    }

    /// Remove an invalid set that is still in use from the active index and clear its hash. The set returns to the
    /// spare list once it is recycled.
    pub(crate) fn punt(&mut self, id: SetId) {
        let Some(set) = self.sets.get_mut(id as usize) else {
            return;
        };
        if set.hash != 0 && self.active.get(&set.key) == Some(&id) {
            self.active.remove(&set.key);
        }
        set.hash = 0;
        debug!("Punted invalid descriptor set {id} of {:?} pool {:?}", self.ty, self.id);
    }

    /// Remove a set from both indices and invalidate it. A set no batch uses goes straight to the spare list.
    pub(crate) fn discard(&mut self, id: SetId) {
        if self.is_null() {
            return;
        }
        self.punt(id);
        self.remove_free(id);
        let Some(set) = self.sets.get_mut(id as usize) else {
            return;
        };
        set.invalidate();
        if set.refcount == 1 {
            self.push_spare(id);
        }
    }

    /// Take a set out of the free index to reuse it for a different key. Invalidated sets are preferred, but at most
    /// `max_scan` valid sets are skipped while looking for one.
    pub(crate) fn evict_free(&mut self, max_scan: usize) -> Option<SetId> {
        let mut skipped = 0;
        let mut victim = None;
        for (key, &id) in self.free.iter() {
            let invalid = self.sets[id as usize].is_invalid();
            if invalid || skipped >= max_scan {
                victim = Some(*key);
                break;
            }
            skipped += 1;
        }
        let key = victim.or_else(|| self.free.keys().next().copied())?;
        let id = self.free.remove(&key)?;
        let set = &mut self.sets[id as usize];
        debug_assert_eq!(set.refcount, 1, "evicted a descriptor set that is still in use");
        set.invalidate();
        set.recycled = false;
        Some(id)
    }

    /// Key a set and insert it in the active index. A different set previously stored under the same key is
    /// invalidated.
    pub(crate) fn insert_active(&mut self, id: SetId, key: DescriptorStateKey) {
        if let Some(set) = self.sets.get_mut(id as usize) {
            set.key = key;
            set.hash = key.hash_value();
            set.recycled = false;
        }
        if let Some(old) = self.active.insert(key, id) {
            if old != id {
                self.displace(old);
            }
        }
    }

    fn displace(&mut self, id: SetId) {
        let Some(set) = self.sets.get_mut(id as usize) else {
            return;
        };
        set.invalidate();
        if set.refcount == 1 {
            self.push_spare(id);
        }
    }

    /// Move a set that no batch uses anymore out of the active index. Valid sets go to the free index, invalid
    /// ones to the spare list. Sets that are still in use, the null set and sets that are not in the active index
    /// under their own key are left alone.
    pub(crate) fn recycle(&mut self, id: SetId) {
        let Some(set) = self.sets.get(id as usize) else {
            return;
        };
        if set.refcount != 1 || self.is_null() {
            return;
        }
        if set.hash != 0 {
            if self.active.get(&set.key) != Some(&id) {
                return;
            }
            self.active.remove(&set.key);
        }

        let set = &mut self.sets[id as usize];
        if set.is_invalid() || set.hash == 0 {
            self.push_spare(id);
        } else {
            set.recycled = true;
            let key = set.key;
            if let Some(old) = self.free.insert(key, id) {
                if old != id {
                    self.push_spare(old);
                }
            }
        }
    }
}

impl<D: DescriptorDevice> InFlight for DescriptorPool<D> {
    fn in_use(&self) -> bool {
        self.sets.iter().any(|set| set.refcount > 1)
    }
}

impl<D: DescriptorDevice> Drop for DescriptorPool<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkDescriptorPool {:p}", self.handle);
        unsafe {
            self.device.destroy_pool(self.handle);
        }
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkDescriptorSetLayout {:p}", self.layout);
        unsafe {
            self.device.destroy_set_layout(self.layout);
        }
    }
}
