//! The [`DescriptorCache`] maps the current binding state of a program to descriptor sets, and owns all descriptor
//! pools.
//!
//! A lookup tries, in order:
//! 1. the set the program used last time for this descriptor type,
//! 2. the active index of the pool,
//! 3. the free index of the pool,
//! 4. a spare set, a set evicted from the free index, or a freshly allocated bucket.
//!
//! When the pool is at capacity and none of these produce a set, the lookup flushes the batch and blocks until the
//! device is idle, which releases every set the retired batches held.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::batch::BatchTracker;
use crate::core::device::DescriptorDevice;
use crate::core::error::Error;
use crate::core::settings::CacheSettings;
use crate::descriptor::binding::BindingSource;
use crate::descriptor::descriptor_pool::{DescriptorPool, PoolId};
use crate::descriptor::descriptor_set::{DescriptorSet, DescriptorStateKey, SetHandle, SetId};
use crate::descriptor::update::{BindingUpdater, UpdateMode};
use crate::descriptor::DescriptorType;
use crate::pipeline::{Program, ShaderInfo, ShaderStage, GRAPHICS_STAGE_COUNT};
use crate::resource::Resource;
use crate::util::deferred_delete::DeletionQueue;
use crate::util::hash::PoolKey;

/// Result of a descriptor set lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetLookup {
    /// The set matching the current binding state.
    pub set: SetHandle,
    /// Whether the set already holds the current binding state. Sets that are not a cache hit must be written.
    pub cache_hit: bool,
    /// Whether the set was newly registered with the current batch, so the resources it uses must be registered too.
    pub need_resource_refs: bool,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
struct PoolSlot<D: DescriptorDevice> {
    pool: DescriptorPool<D>,
    users: u32,
    key: PoolKey,
}

/// Owns all descriptor pools and maps binding states to descriptor sets.
///
/// The cache is meant to be owned by a single recording context and is not [`Send`].
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct DescriptorCache<D: DescriptorDevice> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    settings: CacheSettings,
    pools: HashMap<PoolId, PoolSlot<D>>,
    shared: HashMap<PoolKey, PoolId>,
    retired: DeletionQueue<DescriptorPool<D>>,
    next_pool_id: u32,
    idle_waits: u64,
}

impl<D: DescriptorDevice> DescriptorCache<D> {
    /// Create a new, empty descriptor cache.
    pub fn new(device: Arc<D>, settings: CacheSettings) -> Self {
        Self {
            device,
            settings,
            pools: HashMap::new(),
            shared: HashMap::new(),
            retired: DeletionQueue::new(settings.pool_ttl.max(1)),
            next_pool_id: 0,
            idle_waits: 0,
        }
    }

    /// The settings this cache was created with.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Access a live descriptor pool.
    pub fn pool(&self, id: PoolId) -> Option<&DescriptorPool<D>> {
        self.pools.get(&id).map(|slot| &slot.pool)
    }

    /// Number of programs using a live descriptor pool.
    pub fn pool_users(&self, id: PoolId) -> Option<u32> {
        self.pools.get(&id).map(|slot| slot.users)
    }

    /// Number of live descriptor pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of pools no program uses anymore that are waiting to be destroyed.
    pub fn retired_pool_count(&self) -> usize {
        self.retired.len()
    }

    /// Access a descriptor set of a live pool.
    pub fn set(&self, handle: SetHandle) -> Option<&DescriptorSet> {
        self.pool(handle.pool())?.set(handle.index())
    }

    /// Number of times a lookup had to wait for the device to become idle.
    pub fn idle_waits(&self) -> u64 {
        self.idle_waits
    }

    /// Create a program from the reflection information of its shaders. This gets or creates a descriptor pool for
    /// every descriptor type the shaders use, a null pool for every unused descriptor type below the highest used one,
    /// and the pipeline layout of the program.
    /// # Errors
    /// - Fails if the shader stages do not form a graphics or compute program.
    /// - Fails if creating a set layout, descriptor pool or the pipeline layout fails. Pools that were already
    ///   acquired for this program are released again.
    pub fn create_program(&mut self, shaders: Vec<ShaderInfo>, is_compute: bool) -> Result<Program> {
        validate_stages(&shaders, is_compute)?;
        let mut program = Program::new(shaders, is_compute);

        let mut bindings: [Vec<vk::DescriptorSetLayoutBinding>; DescriptorType::COUNT] = Default::default();
        let mut indices: [Vec<u32>; DescriptorType::COUNT] = Default::default();
        let mut sizes = HashMap::<vk::DescriptorType, u32>::new();
        for shader in program.shaders() {
            for ty in DescriptorType::ALL {
                for binding in shader.bindings(ty) {
                    bindings[ty.index()].push(vk::DescriptorSetLayoutBinding {
                        binding: binding.binding,
                        descriptor_type: binding.ty,
                        descriptor_count: binding.size,
                        stage_flags: shader.stage().stage_flags(),
                        p_immutable_samplers: std::ptr::null(),
                    });
                    indices[ty.index()].push(binding.index);
                    *sizes.entry(binding.ty).or_insert(0) += binding.size;
                }
            }
        }

        let highest = DescriptorType::ALL
            .iter()
            .rposition(|ty| !bindings[ty.index()].is_empty());
        if let Some(highest) = highest {
            for ty in &DescriptorType::ALL[..=highest] {
                let ty = *ty;
                let result = if bindings[ty.index()].is_empty() {
                    self.acquire_null_pool(ty)
                } else {
                    let type_sizes = ty
                        .native_types()
                        .iter()
                        .filter_map(|native| {
                            sizes.get(native).map(|count| vk::DescriptorPoolSize {
                                ty: *native,
                                descriptor_count: count.saturating_mul(self.settings.max_sets_per_pool),
                            })
                        })
                        .collect::<Vec<_>>();
                    self.acquire_pool(ty, &bindings[ty.index()], &type_sizes, &indices[ty.index()])
                };
                match result {
                    Ok(id) => program.pools[ty.index()] = Some(id),
                    Err(err) => {
                        self.release_program_pools(&mut program);
                        return Err(err);
                    }
                }
            }
        }

        let layouts = program
            .pools
            .iter()
            .flatten()
            .filter_map(|id| self.pool(*id))
            .map(|pool| unsafe { pool.layout() })
            .collect::<Vec<_>>();
        program.layout = match unsafe { self.device.create_program_layout(layouts.as_slice()) } {
            Ok(layout) => layout,
            Err(err) => {
                error!("Failed to create pipeline layout: {err}");
                self.release_program_pools(&mut program);
                return Err(Error::from(err).into());
            }
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipelineLayout {:p}", program.layout);

        Ok(program)
    }

    /// Destroy a program. Its pipeline layout is destroyed immediately, so no batch may still use the program.
    /// Descriptor pools no other program uses are retired and destroyed by [`DescriptorCache::next_frame`] once
    /// none of their sets is in use anymore.
    pub fn destroy_program(&mut self, mut program: Program) {
        if program.layout != vk::PipelineLayout::null() {
            #[cfg(feature = "log-objects")]
            trace!("Destroying VkPipelineLayout {:p}", program.layout);
            unsafe { self.device.destroy_program_layout(program.layout) };
            program.layout = vk::PipelineLayout::null();
        }
        self.release_program_pools(&mut program);
    }

    fn acquire_pool(
        &mut self,
        ty: DescriptorType,
        bindings: &[vk::DescriptorSetLayoutBinding],
        sizes: &[vk::DescriptorPoolSize],
        indices: &[u32],
    ) -> Result<PoolId> {
        let key = PoolKey::new(ty, bindings, sizes, indices);
        let settings = self.settings;
        self.acquire_shared(key, |device, id| DescriptorPool::new(device, id, ty, bindings, sizes, &settings))
    }

    fn acquire_null_pool(&mut self, ty: DescriptorType) -> Result<PoolId> {
        let key = PoolKey::new(ty, &[], &[], &[]);
        let settings = self.settings;
        self.acquire_shared(key, |device, id| DescriptorPool::new_null(device, id, ty, &settings))
    }

    fn acquire_shared(&mut self, key: PoolKey, create: impl FnOnce(Arc<D>, PoolId) -> Result<DescriptorPool<D>>) -> Result<PoolId> {
        if let Some(slot) = self.shared.get(&key).and_then(|id| self.pools.get_mut(id)) {
            slot.users += 1;
            return Ok(slot.pool.id());
        }
        let id = PoolId(self.next_pool_id);
        let pool = create(self.device.clone(), id)?;
        self.next_pool_id += 1;
        debug!("Created descriptor pool {id:?} for {:?}", pool.ty());
        self.pools.insert(
            id,
            PoolSlot {
                pool,
                users: 1,
                key: key.clone(),
            },
        );
        self.shared.insert(key, id);
        Ok(id)
    }

    fn release_program_pools(&mut self, program: &mut Program) {
        for id in program.pools.iter_mut().filter_map(Option::take) {
            self.release_pool(id);
        }
        program.last_set = [None; DescriptorType::COUNT];
    }

    fn release_pool(&mut self, id: PoolId) {
        let Some(slot) = self.pools.get_mut(&id) else {
            return;
        };
        slot.users = slot.users.saturating_sub(1);
        if slot.users > 0 {
            return;
        }
        if let Some(slot) = self.pools.remove(&id) {
            if self.shared.get(&slot.key) == Some(&id) {
                self.shared.remove(&slot.key);
            }
            debug!("Retiring descriptor pool {id:?} for {:?}", slot.pool.ty());
            self.retired.push(slot.pool);
        }
    }

    fn state_key<S: BindingSource>(program: &Program, ty: DescriptorType, bindings: &S) -> DescriptorStateKey {
        let mut states = [0; GRAPHICS_STAGE_COUNT];
        for shader in program.shaders() {
            states[shader.stage().state_index()] = bindings.descriptor_state(shader.stage(), ty);
        }
        DescriptorStateKey::new(states)
    }

    /// Get the descriptor set matching the current binding state of `program` for one descriptor type.
    ///
    /// The returned set is registered with the current batch. If the pool is exhausted, this blocks until the device
    /// is idle and retries.
    /// # Errors
    /// - Fails if the program has no pool for this descriptor type.
    /// - Fails if allocating new descriptor sets fails.
    /// - Fails with [`Error::PoolExhausted`] if waiting for the device did not free up any set.
    pub fn get_set<B: BatchTracker, S: BindingSource>(
        &mut self,
        program: &mut Program,
        ty: DescriptorType,
        batch: &mut B,
        bindings: &S,
    ) -> Result<SetLookup> {
        let pool_id = program.pool(ty).ok_or(Error::NoDescriptorPool(ty))?;
        loop {
            if let Some(lookup) = self.lookup(program, ty, pool_id, batch, bindings)? {
                return Ok(lookup);
            }
            self.wait_for_idle(program, ty, pool_id, batch)?;
        }
    }

    fn wait_for_idle<B: BatchTracker>(&mut self, program: &Program, ty: DescriptorType, pool_id: PoolId, batch: &mut B) -> Result<()> {
        warn!("Descriptor pool {pool_id:?} for {ty:?} is exhausted, waiting for the device to become idle");
        let retired = batch.wait_for_idle()?;
        self.idle_waits += 1;
        self.release_sets(retired);
        batch.keep_alive(program.id());

        let pool = self.pool(pool_id).ok_or(Error::NoDescriptorPool(ty))?;
        if !pool.has_capacity() {
            error!("Descriptor pool {pool_id:?} for {ty:?} is still exhausted after waiting for the device");
            return Err(Error::PoolExhausted(ty).into());
        }
        Ok(())
    }

    /// A single lookup attempt. Returns `None` if the pool is exhausted.
    fn lookup<B: BatchTracker, S: BindingSource>(
        &mut self,
        program: &mut Program,
        ty: DescriptorType,
        pool_id: PoolId,
        batch: &mut B,
        bindings: &S,
    ) -> Result<Option<SetLookup>> {
        let max_free_scan = self.settings.max_free_scan;
        let pool = &mut self.pools.get_mut(&pool_id).ok_or(Error::NoDescriptorPool(ty))?.pool;

        if pool.is_null() {
            let (id, cache_hit) = match pool.null_set() {
                Some(id) => (id, true),
                None if pool.remaining_capacity() == 0 => return Ok(None),
                None => {
                    let id = pool.allocate_bucket()?;
                    pool.set_null_set(id);
                    (id, false)
                }
            };
            return Ok(Some(finish_lookup(pool, program, ty, id, cache_hit, batch)));
        }

        let key = Self::state_key(program, ty, bindings);

        // The set this program used last time.
        if let Some(id) = program.last_set[ty.index()] {
            let handle = SetHandle::new(pool_id, id);
            if let Some(set) = pool.set(id) {
                if set.hash() == key.hash_value() && *set.key() == key {
                    let invalid = set.is_invalid();
                    if set.is_recycled() {
                        pool.remove_free(id);
                        pool.insert_active(id, key);
                        return Ok(Some(finish_lookup(pool, program, ty, id, !invalid, batch)));
                    }
                    if !invalid || !batch.is_referenced(handle) {
                        pool.insert_active(id, key);
                        return Ok(Some(finish_lookup(pool, program, ty, id, !invalid, batch)));
                    }
                    pool.punt(id);
                } else if set.hash() != 0 && set.is_invalid() && batch.is_referenced(handle) {
                    // An invalid set still in flight can never be a hit again.
                    pool.punt(id);
                }
            }
        }

        // Sets keyed with the same binding state.
        let mut punted = false;
        if let Some(id) = pool.find_active(&key) {
            let invalid = pool.set(id).map_or(true, |set| set.is_invalid());
            if invalid && batch.is_referenced(SetHandle::new(pool_id, id)) {
                pool.punt(id);
                punted = true;
            } else {
                return Ok(Some(finish_lookup(pool, program, ty, id, !invalid, batch)));
            }
        }
        if !punted {
            if let Some(id) = pool.take_free(&key) {
                let invalid = pool.set(id).map_or(true, |set| set.is_invalid());
                pool.insert_active(id, key);
                return Ok(Some(finish_lookup(pool, program, ty, id, !invalid, batch)));
            }
        }

        // Miss: reuse a set without a key, evict one from the free index, or allocate.
        let id = match pool.pop_spare().or_else(|| pool.evict_free(max_free_scan)) {
            Some(id) => id,
            None if pool.remaining_capacity() == 0 => return Ok(None),
            None => pool.allocate_bucket()?,
        };
        pool.insert_active(id, key);
        Ok(Some(finish_lookup(pool, program, ty, id, false, batch)))
    }

    /// Recycle a set that is no longer used by any batch: move it from the active to the free index, or to the spare
    /// list if its contents are invalid. Does nothing while any batch still references the set.
    pub fn recycle(&mut self, handle: SetHandle) {
        if let Some(slot) = self.pools.get_mut(&handle.pool()) {
            slot.pool.recycle(handle.index());
        }
    }

    /// Hand back set references held by a retired batch. Sets that are no longer referenced by any batch are recycled.
    pub fn release_sets(&mut self, handles: impl IntoIterator<Item = SetHandle>) {
        for handle in handles {
            if let Some(slot) = self.pools.get_mut(&handle.pool()) {
                if release_reference(&mut slot.pool, handle.index()) {
                    slot.pool.recycle(handle.index());
                }
            } else if let Some(pool) = self.retired.find_mut(|pool| pool.id() == handle.pool()) {
                release_reference(pool, handle.index());
            } else {
                debug!("Released descriptor set {handle:?} of a destroyed pool");
            }
        }
    }

    /// Invalidate a set: remove it from the cache and mark its contents invalid. Once no batch uses the set anymore,
    /// it is reused for a different binding state.
    pub fn invalidate(&mut self, handle: SetHandle) {
        if let Some(slot) = self.pools.get_mut(&handle.pool()) {
            slot.pool.discard(handle.index());
        }
    }

    /// Get the descriptor sets for all descriptor types of `program`, write them if needed, record the barriers for
    /// the resources they use and bind them to the command buffer of the current batch.
    ///
    /// Returns every resource with persistent mappings used by the sets.
    /// # Errors
    /// - Fails if a set lookup fails, see [`DescriptorCache::get_set`].
    /// - Fails with [`Error::NullDescriptorUnsupported`] if a binding is empty and null descriptors are disabled.
    pub fn update_and_bind<B: BatchTracker, S: BindingSource>(
        &mut self,
        program: &mut Program,
        batch: &mut B,
        bindings: &S,
    ) -> Result<Vec<Rc<Resource>>> {
        let mut lookups: [Option<SetLookup>; DescriptorType::COUNT] = [None; DescriptorType::COUNT];
        'lookup: loop {
            let waits = self.idle_waits;
            for ty in DescriptorType::ALL {
                if program.pool(ty).is_none() {
                    continue;
                }
                let lookup = self.get_set(program, ty, batch, bindings)?;
                let previous = lookups[ty.index()];
                lookups[ty.index()] = Some(match previous {
                    Some(previous) if previous.set == lookup.set => SetLookup {
                        set: lookup.set,
                        cache_hit: lookup.cache_hit && previous.cache_hit,
                        need_resource_refs: lookup.need_resource_refs || previous.need_resource_refs,
                    },
                    Some(previous) => {
                        if !previous.cache_hit {
                            self.discard_unwritten(previous.set);
                        }
                        lookup
                    }
                    None => lookup,
                });
                // Waiting released the sets looked up before, so look them up again.
                if self.idle_waits != waits {
                    continue 'lookup;
                }
            }
            break;
        }
        batch.keep_alive(program.id());

        let mut dynamic_offsets = Vec::new();
        for ty in DescriptorType::ALL {
            let Some(lookup) = lookups[ty.index()] else {
                continue;
            };
            match self.update_set(program, ty, lookup, batch, bindings) {
                Ok(offsets) => {
                    if ty == DescriptorType::UniformBuffer {
                        dynamic_offsets = offsets;
                    }
                }
                Err(err) => {
                    for lookup in lookups[ty.index()..].iter().flatten() {
                        if !lookup.cache_hit {
                            self.discard_unwritten(lookup.set);
                        }
                    }
                    return Err(err);
                }
            }
        }

        let mut persistent: Vec<Rc<Resource>> = Vec::new();
        let mut sets = Vec::with_capacity(DescriptorType::COUNT);
        for lookup in lookups.iter().flatten() {
            let set = self.set(lookup.set).ok_or(Error::InvalidSetHandle)?;
            sets.push(unsafe { set.handle() });
            for barrier in set.barriers() {
                let Some(resource) = barrier.resource() else {
                    continue;
                };
                if resource.persistent_maps() > 0 && !persistent.iter().any(|known| Rc::ptr_eq(known, &resource)) {
                    persistent.push(resource.clone());
                }
                if lookup.need_resource_refs {
                    batch.reference_resource(&resource, barrier.is_write());
                }
                batch.resource_barrier(&resource, barrier);
            }
        }

        if !sets.is_empty() {
            debug_assert!(
                lookups.iter().take(sets.len()).all(Option::is_some),
                "descriptor sets of a program must be contiguous"
            );
            let cmd = batch.command_buffer(program.is_compute());
            unsafe {
                self.device
                    .cmd_bind_sets(cmd, program.bind_point(), program.layout(), 0, sets.as_slice(), dynamic_offsets.as_slice());
            }
        }
        Ok(persistent)
    }

    fn update_set<B: BatchTracker, S: BindingSource>(
        &mut self,
        program: &Program,
        ty: DescriptorType,
        lookup: SetLookup,
        batch: &mut B,
        bindings: &S,
    ) -> Result<Vec<u32>> {
        let slot = self.pools.get_mut(&lookup.set.pool()).ok_or(Error::InvalidSetHandle)?;
        if slot.pool.is_null() {
            return Ok(Vec::new());
        }
        let set = slot.pool.set_mut(lookup.set.index()).ok_or(Error::InvalidSetHandle)?;
        let mode = UpdateMode {
            cache_hit: lookup.cache_hit,
            need_resource_refs: lookup.need_resource_refs,
        };
        let updater = BindingUpdater::new(program, set, mode, self.settings.null_descriptors, batch, bindings);
        updater.update(self.device.as_ref(), ty, set)
    }

    /// Drop a set that was handed out as a miss but never written.
    fn discard_unwritten(&mut self, handle: SetHandle) {
        debug!("Discarding unwritten descriptor set {handle:?}");
        self.invalidate(handle);
    }

    /// Advance the cache to the next frame. Retired pools whose time to live expired and whose sets are no longer
    /// in use are destroyed.
    pub fn next_frame(&mut self) {
        self.retired.next_frame();
    }
}

/// Commit a lookup: mark the set valid, remember it as the program's last set and register it with the batch.
fn finish_lookup<D: DescriptorDevice, B: BatchTracker>(
    pool: &mut DescriptorPool<D>,
    program: &mut Program,
    ty: DescriptorType,
    id: SetId,
    cache_hit: bool,
    batch: &mut B,
) -> SetLookup {
    let handle = SetHandle::new(pool.id(), id);
    let mut need_resource_refs = false;
    if let Some(set) = pool.set_mut(id) {
        if !cache_hit {
            set.barriers.clear();
        }
        set.slots.set_invalid(false);
        if batch.register_set(handle) {
            set.refcount += 1;
            need_resource_refs = true;
        }
    }
    program.last_set[ty.index()] = Some(id);
    SetLookup {
        set: handle,
        cache_hit,
        need_resource_refs,
    }
}

/// Drop one batch reference to a set. Returns whether only the pool still holds the set.
fn release_reference<D: DescriptorDevice>(pool: &mut DescriptorPool<D>, id: SetId) -> bool {
    let Some(set) = pool.set_mut(id) else {
        return false;
    };
    debug_assert!(set.refcount > 1, "released a descriptor set that no batch references");
    set.refcount = set.refcount.saturating_sub(1).max(1);
    set.refcount == 1
}

fn validate_stages(shaders: &[ShaderInfo], is_compute: bool) -> Result<()> {
    if is_compute {
        return match shaders {
            [shader] if shader.stage() == ShaderStage::Compute => Ok(()),
            _ => Err(Error::InvalidProgram("a compute program needs exactly one compute shader").into()),
        };
    }
    if shaders.is_empty() {
        return Err(Error::InvalidProgram("a graphics program needs at least one shader").into());
    }
    for (i, shader) in shaders.iter().enumerate() {
        if shader.stage().is_compute() {
            return Err(Error::InvalidProgram("a graphics program cannot have a compute shader").into());
        }
        if shaders[..i].iter().any(|other| other.stage() == shader.stage()) {
            return Err(Error::InvalidProgram("a graphics program has two shaders for the same stage").into());
        }
    }
    Ok(())
}
