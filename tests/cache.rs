use anyhow::Result;

use deimos::prelude::*;

mod framework;

#[test]
pub fn same_state_is_cache_hit() -> Result<()> {
    let (device, mut cache, mut program) = framework::make_ubo_program(CacheSettings::default())?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let buffer = framework::make_buffer();
    bindings.bind_ubo(ShaderStage::Fragment, 0, &buffer, 0, 64);

    let first = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(!first.cache_hit, "First lookup of a binding state must be a miss.");
    assert!(first.need_resource_refs, "Set is new to the batch, so resources must be referenced.");

    let second = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert_eq!(first.set, second.set, "Unchanged binding state must return the same set.");
    assert!(second.cache_hit, "Second lookup of an unchanged state must be a hit.");
    assert!(!second.need_resource_refs, "Set is already referenced by this batch.");
    assert_eq!(device.buckets.borrow().as_slice(), &[10], "Only one bucket should be allocated.");
    Ok(())
}

#[test]
pub fn repeated_hit_keeps_barriers() -> Result<()> {
    let (device, mut cache, mut program) = framework::make_ubo_program(CacheSettings::default())?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let buffer = framework::make_buffer();
    bindings.bind_ubo(ShaderStage::Fragment, 0, &buffer, 0, 64);

    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let handle = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");
    let set = cache.pool(handle).and_then(|pool| pool.set(0)).expect("First set should exist.");
    let before = set
        .barriers()
        .iter()
        .map(|barrier| (barrier.resource_id(), barrier.access(), barrier.stages()))
        .collect::<Vec<_>>();

    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let set = cache.pool(handle).and_then(|pool| pool.set(0)).expect("First set should exist.");
    let after = set
        .barriers()
        .iter()
        .map(|barrier| (barrier.resource_id(), barrier.access(), barrier.stages()))
        .collect::<Vec<_>>();

    assert_eq!(before, after, "A cache hit must not change the barriers of a set.");
    assert_eq!(device.write_calls.get(), 1, "A cache hit must not write the set again.");
    assert_eq!(device.binds.borrow().len(), 2, "Every update should bind the sets.");
    Ok(())
}

#[test]
pub fn rebinding_changes_set() -> Result<()> {
    let (device, mut cache, mut program) = framework::make_ubo_program(CacheSettings::default())?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let first_buffer = framework::make_buffer();
    let second_buffer = framework::make_buffer();

    bindings.bind_ubo(ShaderStage::Fragment, 0, &first_buffer, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let a = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    let set = cache.set(a.set).expect("Set should exist.");
    assert_eq!(set.barriers().len(), 1, "A single uniform buffer produces a single barrier.");
    assert_eq!(set.barriers()[0].resource_id(), first_buffer.id());
    assert_eq!(set.barriers()[0].access(), vk::AccessFlags::UNIFORM_READ);
    assert_eq!(set.barriers()[0].layout(), vk::ImageLayout::UNDEFINED);
    assert_eq!(set.bound_object(0), Some(first_buffer.id()));

    bindings.bind_ubo(ShaderStage::Fragment, 0, &second_buffer, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let b = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert_ne!(a.set, b.set, "A different binding state must get a different set.");
    assert_eq!(cache.set(b.set).and_then(|set| set.bound_object(0)), Some(second_buffer.id()));

    let pool = cache.pool(a.set.pool()).expect("Pool should exist.");
    assert!(pool.is_active(a.set.index()), "The old set is still in use and stays in the active index.");
    assert!(!pool.is_free(a.set.index()), "The old set cannot be recycled while the batch uses it.");

    bindings.bind_ubo(ShaderStage::Fragment, 0, &first_buffer, 0, 64);
    let again = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert_eq!(again.set, a.set, "Returning to an earlier binding state must find the earlier set.");
    assert!(again.cache_hit);
    assert_eq!(device.write_calls.get(), 2, "Each distinct binding state is written exactly once.");
    Ok(())
}

#[test]
pub fn recycled_set_is_reused() -> Result<()> {
    let (device, mut cache, mut program) = framework::make_ubo_program(CacheSettings::default())?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let first_buffer = framework::make_buffer();
    let second_buffer = framework::make_buffer();

    bindings.bind_ubo(ShaderStage::Fragment, 0, &first_buffer, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let a = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    cache.release_sets(batch.flush());

    let pool = cache.pool(a.set.pool()).expect("Pool should exist.");
    assert!(pool.is_free(a.set.index()), "A valid set no batch uses anymore moves to the free index.");
    assert!(!pool.is_active(a.set.index()));
    assert_eq!(cache.set(a.set).map(|set| set.reference_count()), Some(1));

    bindings.bind_ubo(ShaderStage::Fragment, 0, &second_buffer, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let b = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert_ne!(a.set, b.set, "A spare set should be preferred over evicting a free set.");

    bindings.bind_ubo(ShaderStage::Fragment, 0, &first_buffer, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let again = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert_eq!(again.set, a.set, "The free index must return the recycled set.");
    let pool = cache.pool(a.set.pool()).expect("Pool should exist.");
    assert!(pool.is_active(a.set.index()), "A set taken from the free index is active again.");
    assert!(!pool.is_free(a.set.index()));
    framework::assert_exclusive(pool);
    // Only the first and second state were written, the recycled set was a hit.
    assert_eq!(device.write_calls.get(), 2);
    Ok(())
}

#[test]
pub fn last_set_fast_path_after_recycle() -> Result<()> {
    let (device, mut cache, mut program) = framework::make_ubo_program(CacheSettings::default())?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let buffer = framework::make_buffer();
    bindings.bind_ubo(ShaderStage::Fragment, 0, &buffer, 0, 64);

    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    cache.release_sets(batch.flush());
    let pool_id = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");
    assert_eq!(cache.pool(pool_id).map(|pool| pool.free_len()), Some(1));

    let lookup = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(lookup.cache_hit, "The recycled last set still holds the current binding state.");
    assert!(lookup.need_resource_refs, "The set is new to this batch.");
    let pool = cache.pool(pool_id).expect("Pool should exist.");
    assert_eq!(pool.free_len(), 0, "The recycled set must leave the free index.");
    assert!(pool.is_active(lookup.set.index()));
    assert!(!cache.set(lookup.set).map_or(true, |set| set.is_recycled()));
    assert_eq!(device.write_calls.get(), 1);
    Ok(())
}

#[test]
pub fn eviction_reuses_free_set() -> Result<()> {
    let settings = CacheSettingsBuilder::new().max_sets_per_pool(2).bucket_factor(2).build();
    let (device, mut cache, mut program) = framework::make_ubo_program(settings)?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let buffers = (0..3).map(|_| framework::make_buffer()).collect::<Vec<_>>();

    for buffer in &buffers[..2] {
        bindings.bind_ubo(ShaderStage::Fragment, 0, buffer, 0, 64);
        cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    }
    cache.release_sets(batch.flush());
    let pool_id = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");
    assert_eq!(cache.pool(pool_id).map(|pool| pool.free_len()), Some(2));

    bindings.bind_ubo(ShaderStage::Fragment, 0, &buffers[2], 0, 64);
    let lookup = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(!lookup.cache_hit, "A new binding state is a miss.");
    let pool = cache.pool(pool_id).expect("Pool should exist.");
    assert_eq!(pool.sets_allocated(), 2, "No new sets can be allocated.");
    assert_eq!(pool.free_len(), 1, "One free set must have been evicted.");
    assert_eq!(cache.idle_waits(), 0, "Evicting must not wait for the device.");
    assert_eq!(batch.waits, 0);
    framework::assert_exclusive(pool);
    assert_eq!(device.buckets.borrow().as_slice(), &[2]);
    Ok(())
}

/// Fill a pool of four sets with one binding state each and retire them all to the free index.
fn fill_free_index(
    cache: &mut DescriptorCache<framework::MockDevice>,
    program: &mut Program,
    bindings: &mut framework::MockBindings,
    buffers: &[std::rc::Rc<Resource>],
) -> Result<Vec<SetHandle>> {
    let mut batch = framework::MockBatch::new();
    let mut sets = Vec::new();
    for buffer in buffers {
        bindings.bind_ubo(ShaderStage::Fragment, 0, buffer, 0, 64);
        cache.update_and_bind(program, &mut batch, &*bindings)?;
        sets.push(cache.get_set(program, DescriptorType::UniformBuffer, &mut batch, &*bindings)?.set);
    }
    cache.release_sets(batch.flush());
    Ok(sets)
}

#[test]
pub fn eviction_prefers_invalid_free_set() -> Result<()> {
    let settings = CacheSettingsBuilder::new().max_sets_per_pool(4).bucket_factor(2).build();
    let (_device, mut cache, mut program) = framework::make_ubo_program(settings)?;
    let mut bindings = framework::MockBindings::new();
    let mut buffers = (0..4).map(|_| framework::make_buffer()).collect::<Vec<_>>();
    let sets = fill_free_index(&mut cache, &mut program, &mut bindings, &buffers)?;
    let pool_id = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");
    assert_eq!(cache.pool(pool_id).map(|pool| pool.free_len()), Some(4));

    drop(buffers.remove(2));
    assert!(cache.set(sets[2]).map_or(false, |set| set.is_invalid()));

    let mut batch = framework::MockBatch::new();
    let fresh = framework::make_buffer();
    bindings.bind_ubo(ShaderStage::Fragment, 0, &fresh, 0, 64);
    let lookup = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(!lookup.cache_hit);
    assert_eq!(lookup.set, sets[2], "The invalidated free set must be evicted first.");
    let pool = cache.pool(pool_id).expect("Pool should exist.");
    for set in [sets[0], sets[1], sets[3]] {
        assert!(pool.is_free(set.index()), "Valid free sets must stay cached.");
    }
    assert_eq!(batch.waits, 0);
    framework::assert_exclusive(pool);
    Ok(())
}

#[test]
pub fn eviction_scan_is_capped() -> Result<()> {
    let settings = CacheSettingsBuilder::new()
        .max_sets_per_pool(4)
        .bucket_factor(2)
        .max_free_scan(1)
        .build();
    let (device, mut cache, mut program) = framework::make_ubo_program(settings)?;
    let mut bindings = framework::MockBindings::new();
    let buffers = (0..4).map(|_| framework::make_buffer()).collect::<Vec<_>>();
    let sets = fill_free_index(&mut cache, &mut program, &mut bindings, &buffers)?;
    let pool_id = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");
    let writes = device.write_calls.get();

    // No free set is invalid, so the scan gives up and evicts a valid one.
    let mut batch = framework::MockBatch::new();
    let fresh = framework::make_buffer();
    bindings.bind_ubo(ShaderStage::Fragment, 0, &fresh, 0, 64);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    let lookup = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(sets.contains(&lookup.set), "A free set must be reused.");
    assert_eq!(device.write_calls.get(), writes + 1, "The evicted set is rewritten.");
    let pool = cache.pool(pool_id).expect("Pool should exist.");
    assert_eq!(pool.free_len(), 3);
    assert_eq!(pool.sets_allocated(), 4);
    assert_eq!(batch.waits, 0);
    framework::assert_exclusive(pool);

    // The binding state of the evicted set is gone and must be written again.
    let evicted = sets.iter().position(|set| *set == lookup.set).expect("Evicted set should be known.");
    cache.release_sets(batch.flush());
    bindings.bind_ubo(ShaderStage::Fragment, 0, &buffers[evicted], 0, 64);
    let again = cache.get_set(&mut program, DescriptorType::UniformBuffer, &mut batch, &bindings)?;
    assert!(!again.cache_hit, "An evicted binding state is a miss.");
    Ok(())
}

#[test]
pub fn exclusive_indices_over_timeline() -> Result<()> {
    let settings = CacheSettingsBuilder::new().max_sets_per_pool(8).bucket_factor(2).build();
    let (_device, mut cache, mut program) = framework::make_ubo_program(settings)?;
    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let mut buffers = (0..6).map(|_| framework::make_buffer()).collect::<Vec<_>>();
    let pool_id = program.pool(DescriptorType::UniformBuffer).expect("Program should have a uniform buffer pool.");

    // Simple LCG so the timeline is deterministic.
    let mut seed = 0x2545_f491_u32;
    let mut next = move || {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        seed >> 16
    };

    for step in 0..400 {
        let buffer = &buffers[(next() % 6) as usize];
        bindings.bind_ubo(ShaderStage::Fragment, 0, buffer, 0, 64);
        cache.update_and_bind(&mut program, &mut batch, &bindings)?;
        match next() % 8 {
            0 => batch.submit(),
            1 => {
                let released = batch.retire_oldest();
                cache.release_sets(released);
            }
            2 => {
                // Replace a buffer, invalidating every set that used it.
                let index = (next() % 6) as usize;
                bindings.ubos.clear();
                buffers[index] = framework::make_buffer();
            }
            _ => {}
        }
        let pool = cache.pool(pool_id).expect("Pool should exist.");
        framework::assert_exclusive(pool);
        assert!(pool.sets_allocated() <= pool.max_sets(), "Step {step} exceeded the pool capacity.");
    }
    Ok(())
}

#[test]
pub fn compute_program_binds_compute() -> Result<()> {
    let (device, mut cache) = framework::make_cache(CacheSettings::default());
    let shader = ShaderInfo::new(ShaderStage::Compute).with_binding(
        DescriptorType::StorageBuffer,
        framework::binding(0, vk::DescriptorType::STORAGE_BUFFER, 0),
    );
    let mut program = cache.create_program(vec![shader], true)?;
    assert_eq!(program.bind_point(), vk::PipelineBindPoint::COMPUTE);
    assert!(program.pool(DescriptorType::UniformBuffer).is_some(), "Lower set indices are filled by null pools.");
    assert!(program.pool(DescriptorType::SamplerView).is_some());
    assert!(program.pool(DescriptorType::Image).is_none(), "Set indices above the highest used one are not filled.");

    let mut batch = framework::MockBatch::new();
    let mut bindings = framework::MockBindings::new();
    let buffer = framework::make_buffer();
    bindings.bind_ssbo(ShaderStage::Compute, 0, &buffer, true);
    cache.update_and_bind(&mut program, &mut batch, &bindings)?;

    let bind = device.last_bind().expect("Sets should be bound.");
    assert_eq!(bind.bind_point, vk::PipelineBindPoint::COMPUTE);
    assert_eq!(bind.first_set, 0);
    assert_eq!(bind.sets.len(), 3, "Two null sets and the storage buffer set are bound.");

    let lookup = cache.get_set(&mut program, DescriptorType::StorageBuffer, &mut batch, &bindings)?;
    let key = cache.set(lookup.set).map(|set| *set.key()).expect("Set should exist.");
    assert_ne!(key.states()[0], 0, "Compute programs keep their state in the first slot.");
    assert!(key.states()[1..].iter().all(|state| *state == 0));
    Ok(())
}

#[test]
pub fn invalid_programs_are_rejected() -> Result<()> {
    let (device, mut cache) = framework::make_cache(CacheSettings::default());
    let compute = ShaderInfo::new(ShaderStage::Compute);

    let result = cache.create_program(vec![framework::empty_vertex(), compute], false);
    assert!(matches!(
        result.as_ref().map_err(|err| err.downcast_ref::<Error>()),
        Err(Some(Error::InvalidProgram(_)))
    ));
    let result = cache.create_program(vec![framework::empty_vertex()], true);
    assert!(result.is_err(), "A compute program needs a compute shader.");
    let result = cache.create_program(vec![framework::empty_vertex(), framework::empty_vertex()], false);
    assert!(result.is_err(), "Stages may not repeat.");
    let result = cache.create_program(Vec::new(), false);
    assert!(result.is_err(), "A graphics program needs a shader.");

    assert_eq!(cache.pool_count(), 0);
    assert_eq!(device.program_layouts_created.get(), 0);
    Ok(())
}

#[test]
pub fn program_without_descriptors() -> Result<()> {
    let (device, mut cache) = framework::make_cache(CacheSettings::default());
    let mut program = cache.create_program(vec![framework::empty_vertex()], false)?;
    assert_eq!(cache.pool_count(), 0);
    assert_eq!(device.program_layout_sets.borrow().as_slice(), &[0]);

    let mut batch = framework::MockBatch::new();
    let bindings = framework::MockBindings::new();
    let persistent = cache.update_and_bind(&mut program, &mut batch, &bindings)?;
    assert!(persistent.is_empty());
    assert!(device.binds.borrow().is_empty(), "Nothing is bound for a program without sets.");

    cache.destroy_program(program);
    assert_eq!(device.program_layouts_destroyed.get(), 1);
    Ok(())
}
