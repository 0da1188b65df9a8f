#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use deimos::prelude::*;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

/// Fabricate a unique, non-null Vulkan handle.
pub fn fake_handle<T: Handle>() -> T {
    T::from_raw(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Initialize logging once for all tests in a binary.
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// A recorded `cmd_bind_sets` call.
#[derive(Debug, Clone)]
pub struct BindCall {
    pub bind_point: vk::PipelineBindPoint,
    pub first_set: u32,
    pub sets: Vec<vk::DescriptorSet>,
    pub dynamic_offsets: Vec<u32>,
}

/// A [`DescriptorDevice`] that fabricates handles and records every call.
#[derive(Debug, Default)]
pub struct MockDevice {
    pub fail_layout_creation: Cell<bool>,
    pub fail_pool_creation: Cell<bool>,
    pub fail_allocation: Cell<bool>,
    pub layouts_created: Cell<u32>,
    pub layouts_destroyed: Cell<u32>,
    pub pools_created: Cell<u32>,
    pub pools_destroyed: Cell<u32>,
    pub pool_max_sets: RefCell<Vec<u32>>,
    pub pool_sizes: RefCell<Vec<Vec<vk::DescriptorPoolSize>>>,
    pub buckets: RefCell<Vec<u32>>,
    pub write_calls: Cell<u32>,
    pub writes: RefCell<Vec<DescriptorWrite>>,
    pub program_layouts_created: Cell<u32>,
    pub program_layouts_destroyed: Cell<u32>,
    pub program_layout_sets: RefCell<Vec<usize>>,
    pub binds: RefCell<Vec<BindCall>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writes recorded since the last call.
    pub fn take_writes(&self) -> Vec<DescriptorWrite> {
        std::mem::take(&mut *self.writes.borrow_mut())
    }

    pub fn last_bind(&self) -> Option<BindCall> {
        self.binds.borrow().last().cloned()
    }
}

impl DescriptorDevice for MockDevice {
    unsafe fn create_set_layout(&self, _bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout> {
        if self.fail_layout_creation.get() {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.layouts_created.set(self.layouts_created.get() + 1);
        Ok(fake_handle())
    }

    unsafe fn destroy_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.layouts_destroyed.set(self.layouts_destroyed.get() + 1);
    }

    unsafe fn create_pool(&self, sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> VkResult<vk::DescriptorPool> {
        if self.fail_pool_creation.get() {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        self.pools_created.set(self.pools_created.get() + 1);
        self.pool_max_sets.borrow_mut().push(max_sets);
        self.pool_sizes.borrow_mut().push(sizes.to_vec());
        Ok(fake_handle())
    }

    unsafe fn destroy_pool(&self, _pool: vk::DescriptorPool) {
        self.pools_destroyed.set(self.pools_destroyed.get() + 1);
    }

    unsafe fn allocate_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        if self.fail_allocation.get() {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        self.buckets.borrow_mut().push(count);
        Ok((0..count).map(|_| fake_handle()).collect())
    }

    unsafe fn write_sets(&self, writes: &[DescriptorWrite]) {
        self.write_calls.set(self.write_calls.get() + 1);
        self.writes.borrow_mut().extend_from_slice(writes);
    }

    unsafe fn create_program_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        self.program_layouts_created.set(self.program_layouts_created.get() + 1);
        self.program_layout_sets.borrow_mut().push(set_layouts.len());
        Ok(fake_handle())
    }

    unsafe fn destroy_program_layout(&self, _layout: vk::PipelineLayout) {
        self.program_layouts_destroyed.set(self.program_layouts_destroyed.get() + 1);
    }

    unsafe fn cmd_bind_sets(
        &self,
        _cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.binds.borrow_mut().push(BindCall {
            bind_point,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }
}

#[derive(Debug, Default)]
struct Batch {
    sets: HashSet<SetHandle>,
    objects: Vec<TrackedObject>,
}

/// A [`BatchTracker`] simulating batch submission and retirement.
#[derive(Debug)]
pub struct MockBatch {
    current: Batch,
    in_flight: Vec<Batch>,
    cmd: vk::CommandBuffer,
    pub waits: u32,
    pub resources: Vec<(ObjectId, bool)>,
    pub barriers: Vec<DescriptorBarrier>,
    pub kept_alive: Vec<ProgramId>,
}

impl MockBatch {
    pub fn new() -> Self {
        Self {
            current: Batch::default(),
            in_flight: Vec::new(),
            cmd: fake_handle(),
            waits: 0,
            resources: Vec::new(),
            barriers: Vec::new(),
            kept_alive: Vec::new(),
        }
    }

    /// Submit the current batch and start recording a new one.
    pub fn submit(&mut self) {
        let batch = std::mem::take(&mut self.current);
        self.in_flight.push(batch);
    }

    /// Retire the oldest submitted batch, returning the set references it held.
    pub fn retire_oldest(&mut self) -> Vec<SetHandle> {
        if self.in_flight.is_empty() {
            return Vec::new();
        }
        let batch = self.in_flight.remove(0);
        batch.sets.into_iter().collect()
    }

    /// Retire all submitted batches.
    pub fn retire_all(&mut self) -> Vec<SetHandle> {
        self.in_flight
            .drain(..)
            .flat_map(|batch| batch.sets.into_iter())
            .collect()
    }

    /// Submit the current batch and retire everything.
    pub fn flush(&mut self) -> Vec<SetHandle> {
        self.submit();
        self.retire_all()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn current_sets(&self) -> usize {
        self.current.sets.len()
    }

    pub fn current_objects(&self) -> usize {
        self.current.objects.len()
    }
}

impl BatchTracker for MockBatch {
    fn register_set(&mut self, set: SetHandle) -> bool {
        self.current.sets.insert(set)
    }

    fn is_referenced(&self, set: SetHandle) -> bool {
        self.current.sets.contains(&set) || self.in_flight.iter().any(|batch| batch.sets.contains(&set))
    }

    fn reference_resource(&mut self, resource: &Rc<Resource>, write: bool) {
        self.resources.push((resource.id(), write));
    }

    fn reference_object(&mut self, object: TrackedObject) {
        self.current.objects.push(object);
    }

    fn keep_alive(&mut self, program: ProgramId) {
        self.kept_alive.push(program);
    }

    fn resource_barrier(&mut self, _resource: &Rc<Resource>, barrier: &DescriptorBarrier) {
        self.barriers.push(barrier.clone());
    }

    fn command_buffer(&mut self, _is_compute: bool) -> vk::CommandBuffer {
        self.cmd
    }

    fn wait_for_idle(&mut self) -> Result<Vec<SetHandle>> {
        self.waits += 1;
        Ok(self.flush())
    }
}

/// A [`BindingSource`] backed by maps, with descriptor states derived from what is bound.
#[derive(Debug, Default)]
pub struct MockBindings {
    pub ubos: BTreeMap<(ShaderStage, u32), BufferBinding>,
    pub ssbos: BTreeMap<(ShaderStage, u32), BufferBinding>,
    pub sampler_views: BTreeMap<(ShaderStage, u32), SampledBinding>,
    pub images: BTreeMap<(ShaderStage, u32), Rc<ImageView>>,
    pub forced: BTreeMap<(ShaderStage, DescriptorType), u32>,
}

impl MockBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_ubo(&mut self, stage: ShaderStage, index: u32, resource: &Rc<Resource>, offset: u64, size: u64) {
        self.ubos.insert(
            (stage, index),
            BufferBinding {
                resource: resource.clone(),
                offset,
                size,
                writable: false,
            },
        );
    }

    pub fn bind_ssbo(&mut self, stage: ShaderStage, index: u32, resource: &Rc<Resource>, writable: bool) {
        self.ssbos.insert(
            (stage, index),
            BufferBinding {
                resource: resource.clone(),
                offset: 0,
                size: 256,
                writable,
            },
        );
    }

    pub fn bind_sampler_view(&mut self, stage: ShaderStage, index: u32, view: &Rc<SamplerView>, sampler: Option<&Rc<Sampler>>) {
        self.sampler_views.insert(
            (stage, index),
            SampledBinding {
                view: view.clone(),
                sampler: sampler.cloned(),
            },
        );
    }

    pub fn bind_image(&mut self, stage: ShaderStage, index: u32, view: &Rc<ImageView>) {
        self.images.insert((stage, index), view.clone());
    }

    /// Override the descriptor state of a stage, regardless of what is bound.
    pub fn force_state(&mut self, stage: ShaderStage, ty: DescriptorType, state: u32) {
        self.forced.insert((stage, ty), state);
    }

    fn hash_entries<T>(map: &BTreeMap<(ShaderStage, u32), T>, stage: ShaderStage, mut hash: impl FnMut(&T, &mut DefaultHasher)) -> u32 {
        let mut hasher = DefaultHasher::new();
        let mut any = false;
        for ((_, index), value) in map.range((stage, 0)..=(stage, u32::MAX)) {
            any = true;
            index.hash(&mut hasher);
            hash(value, &mut hasher);
        }
        if !any {
            return 0;
        }
        match hasher.finish() as u32 {
            0 => 1,
            state => state,
        }
    }
}

impl BindingSource for MockBindings {
    fn descriptor_state(&self, stage: ShaderStage, ty: DescriptorType) -> u32 {
        if let Some(state) = self.forced.get(&(stage, ty)) {
            return *state;
        }
        match ty {
            DescriptorType::UniformBuffer => Self::hash_entries(&self.ubos, stage, |binding, hasher| {
                binding.resource.id().hash(hasher);
                binding.offset.hash(hasher);
                binding.size.hash(hasher);
            }),
            DescriptorType::StorageBuffer => Self::hash_entries(&self.ssbos, stage, |binding, hasher| {
                binding.resource.id().hash(hasher);
                binding.offset.hash(hasher);
                binding.size.hash(hasher);
                binding.writable.hash(hasher);
            }),
            DescriptorType::SamplerView => Self::hash_entries(&self.sampler_views, stage, |binding, hasher| {
                binding.view.id().hash(hasher);
                binding.sampler.as_ref().map(|sampler| sampler.id()).hash(hasher);
            }),
            DescriptorType::Image => Self::hash_entries(&self.images, stage, |view, hasher| {
                view.id().hash(hasher);
            }),
        }
    }

    fn uniform_buffer(&self, stage: ShaderStage, index: u32) -> Option<BufferBinding> {
        self.ubos.get(&(stage, index)).cloned()
    }

    fn storage_buffer(&self, stage: ShaderStage, index: u32) -> Option<BufferBinding> {
        self.ssbos.get(&(stage, index)).cloned()
    }

    fn sampler_view(&self, stage: ShaderStage, index: u32) -> Option<SampledBinding> {
        self.sampler_views.get(&(stage, index)).cloned()
    }

    fn image_view(&self, stage: ShaderStage, index: u32) -> Option<Rc<ImageView>> {
        self.images.get(&(stage, index)).cloned()
    }
}

/// A single binding of reflection info.
pub fn binding(binding: u32, ty: vk::DescriptorType, index: u32) -> ShaderBinding {
    ShaderBinding {
        binding,
        ty,
        size: 1,
        index,
    }
}

/// A vertex shader without any descriptors.
pub fn empty_vertex() -> ShaderInfo {
    ShaderInfo::new(ShaderStage::Vertex)
}

/// A fragment shader reading a single uniform buffer at binding 0 from uniform buffer slot 0.
pub fn ubo_fragment() -> ShaderInfo {
    ShaderInfo::new(ShaderStage::Fragment).with_binding(
        DescriptorType::UniformBuffer,
        binding(0, vk::DescriptorType::UNIFORM_BUFFER, 0),
    )
}

/// Create a cache over a fresh mock device.
pub fn make_cache(settings: CacheSettings) -> (Arc<MockDevice>, DescriptorCache<MockDevice>) {
    init_logging();
    let device = MockDevice::new();
    let cache = DescriptorCache::new(device.clone(), settings);
    (device, cache)
}

/// Create a cache and a graphics program with a single uniform buffer in the fragment stage.
pub fn make_ubo_program(settings: CacheSettings) -> Result<(Arc<MockDevice>, DescriptorCache<MockDevice>, Program)> {
    let (device, mut cache) = make_cache(settings);
    let program = cache.create_program(vec![empty_vertex(), ubo_fragment()], false)?;
    Ok((device, cache, program))
}

/// Create an externally owned buffer resource.
pub fn make_buffer() -> Rc<Resource> {
    Resource::buffer(fake_handle())
}

/// Create an externally owned image resource.
pub fn make_image() -> Rc<Resource> {
    Resource::image(fake_handle())
}

/// Check that no keyed set of a pool is in both the active and the free index.
pub fn assert_exclusive(pool: &DescriptorPool<MockDevice>) {
    for index in 0..pool.sets_allocated() {
        let Some(set) = pool.set(index) else {
            continue;
        };
        if set.hash() == 0 {
            continue;
        }
        assert!(
            !(pool.is_active(index) && pool.is_free(index)),
            "descriptor set {index} is in both the active and the free index"
        );
    }
}
