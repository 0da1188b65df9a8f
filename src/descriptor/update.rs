//! Populates a descriptor set from the current binding state.
//!
//! The updater walks the shaders of a program in stage order, and every binding of one descriptor type within each
//! shader. Every array element of a binding occupies one slot of the set. For each slot the bound object is resolved,
//! its native descriptor entry is built, a barrier candidate is registered and the back-reference from the object to
//! the slot is installed. On a cache hit the set already holds all of this, so nothing is written and the barriers
//! cached on the set are kept.

use std::rc::Rc;

use anyhow::Result;
use ash::vk;

use crate::core::batch::{BatchTracker, TrackedObject};
use crate::core::device::DescriptorDevice;
use crate::core::error::Error;
use crate::descriptor::barrier::BarrierCollector;
use crate::descriptor::binding::{BindingSource, BufferBinding, SampledBinding};
use crate::descriptor::descriptor_set::{DescriptorContents, DescriptorSet, DescriptorWrite};
use crate::descriptor::references::{add_reference, holds_reference, SetSlots, SlotKind, Tracked};
use crate::descriptor::DescriptorType;
use crate::pipeline::{Program, ShaderBinding, ShaderStage};
use crate::resource::image::ViewHandle;

/// How a set was obtained from the cache.
#[derive(Debug, Copy, Clone)]
pub(crate) struct UpdateMode {
    pub cache_hit: bool,
    pub need_resource_refs: bool,
}

/// One update pass over a single descriptor set.
pub(crate) struct BindingUpdater<'a, B: BatchTracker, S: BindingSource> {
    program: &'a Program,
    batch: &'a mut B,
    bindings: &'a S,
    mode: UpdateMode,
    null_descriptors: bool,
    handle: vk::DescriptorSet,
    slots: Rc<SetSlots>,
    slot: usize,
    writes: Vec<DescriptorWrite>,
    barriers: Option<BarrierCollector>,
    dynamic_offsets: Vec<((u32, u32), u32)>,
}

impl<'a, B: BatchTracker, S: BindingSource> BindingUpdater<'a, B, S> {
    pub fn new(program: &'a Program, set: &DescriptorSet, mode: UpdateMode, null_descriptors: bool, batch: &'a mut B, bindings: &'a S) -> Self {
        let slot_count = set.slot_count();
        Self {
            program,
            batch,
            bindings,
            mode,
            null_descriptors,
            handle: unsafe { set.handle() },
            slots: set.slots.clone(),
            slot: 0,
            writes: Vec::new(),
            barriers: (!mode.cache_hit).then(|| BarrierCollector::with_capacity(slot_count)),
            dynamic_offsets: Vec::new(),
        }
    }

    /// Run the update for one descriptor type. Returns the dynamic offsets of the set, sorted by binding number and
    /// then by array element.
    pub fn update<D: DescriptorDevice>(mut self, device: &D, ty: DescriptorType, set: &mut DescriptorSet) -> Result<Vec<u32>> {
        // A hit that is already referenced by the batch needs nothing but its dynamic offsets.
        let walk = !self.mode.cache_hit || self.mode.need_resource_refs || ty == DescriptorType::UniformBuffer;
        if walk {
            let program = self.program;
            for shader in program.shaders() {
                for binding in shader.bindings(ty) {
                    match ty {
                        DescriptorType::UniformBuffer => self.uniform_buffer(shader.stage(), binding)?,
                        DescriptorType::SamplerView => self.sampler_view(shader.stage(), binding)?,
                        DescriptorType::StorageBuffer => self.storage_buffer(shader.stage(), binding)?,
                        DescriptorType::Image => self.image(shader.stage(), binding)?,
                    }
                }
            }
            debug_assert!(self.slot <= self.slots.len(), "more bound objects than slots in the set");
        }

        if let Some(barriers) = self.barriers.take() {
            set.barriers = barriers.finish();
        }
        if !self.mode.cache_hit && !self.writes.is_empty() {
            unsafe { device.write_sets(self.writes.as_slice()) };
        }

        self.dynamic_offsets.sort_by_key(|(position, _)| *position);
        Ok(self.dynamic_offsets.into_iter().map(|(_, offset)| offset).collect())
    }

    fn next_slot(&mut self) -> usize {
        let slot = self.slot;
        self.slot += 1;
        slot
    }

    /// Record `object` in a slot, or verify the slot still holds it on a cache hit.
    fn reference<T: Tracked + ?Sized>(&self, kind: SlotKind, slot: usize, object: Option<&T>) {
        if self.mode.cache_hit {
            debug_assert!(
                holds_reference(&self.slots, kind, slot, object),
                "cached descriptor set slot {slot} does not hold the bound object"
            );
        } else {
            add_reference(&self.slots, kind, slot, object);
        }
    }

    fn write(&mut self, binding: &ShaderBinding, contents: DescriptorContents) {
        if self.mode.cache_hit {
            return;
        }
        self.writes.push(DescriptorWrite {
            set: self.handle,
            binding: binding.binding,
            array_element: 0,
            ty: binding.ty,
            contents,
        });
    }

    fn require_null_descriptor(&self, binding: &ShaderBinding) -> Result<()> {
        if self.null_descriptors {
            Ok(())
        } else {
            Err(Error::NullDescriptorUnsupported {
                binding: binding.binding,
            }
            .into())
        }
    }

    fn uniform_buffer(&mut self, stage: ShaderStage, binding: &ShaderBinding) -> Result<()> {
        debug_assert!(DescriptorType::UniformBuffer.accepts(binding.ty));
        let dynamic = binding.ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC;
        let mut infos = Vec::with_capacity(binding.size as usize);
        for element in 0..binding.size {
            let slot = self.next_slot();
            let bound = self.bindings.uniform_buffer(stage, binding.index + element);
            if bound.is_none() {
                self.require_null_descriptor(binding)?;
            }
            self.reference(SlotKind::Object, slot, bound.as_ref().map(|bound| bound.resource.as_ref()));

            let offset = bound.as_ref().map_or(0, |bound| bound.offset);
            if dynamic {
                self.dynamic_offsets.push(((binding.binding, element), offset as u32));
            }
            infos.push(buffer_info(bound.as_ref(), if dynamic { 0 } else { offset }));

            if let (Some(bound), Some(barriers)) = (&bound, self.barriers.as_mut()) {
                barriers.add(&bound.resource, vk::ImageLayout::UNDEFINED, vk::AccessFlags::UNIFORM_READ, stage.pipeline_stage());
            }
        }
        self.write(binding, DescriptorContents::Buffer(infos));
        Ok(())
    }

    fn storage_buffer(&mut self, stage: ShaderStage, binding: &ShaderBinding) -> Result<()> {
        debug_assert!(DescriptorType::StorageBuffer.accepts(binding.ty));
        let mut infos = Vec::with_capacity(binding.size as usize);
        for element in 0..binding.size {
            let slot = self.next_slot();
            let bound = self.bindings.storage_buffer(stage, binding.index + element);
            if bound.is_none() {
                self.require_null_descriptor(binding)?;
            }
            self.reference(SlotKind::Object, slot, bound.as_ref().map(|bound| bound.resource.as_ref()));
            infos.push(buffer_info(bound.as_ref(), bound.as_ref().map_or(0, |bound| bound.offset)));

            if let (Some(bound), Some(barriers)) = (&bound, self.barriers.as_mut()) {
                let mut access = vk::AccessFlags::SHADER_READ;
                if bound.writable {
                    access |= vk::AccessFlags::SHADER_WRITE;
                }
                barriers.add(&bound.resource, vk::ImageLayout::UNDEFINED, access, stage.pipeline_stage());
            }
        }
        self.write(binding, DescriptorContents::Buffer(infos));
        Ok(())
    }

    fn sampler_view(&mut self, stage: ShaderStage, binding: &ShaderBinding) -> Result<()> {
        debug_assert!(DescriptorType::SamplerView.accepts(binding.ty));
        let texel = binding.ty == vk::DescriptorType::UNIFORM_TEXEL_BUFFER;
        let mut images = Vec::new();
        let mut texels = Vec::new();
        for element in 0..binding.size {
            let slot = self.next_slot();
            let bound = self.bindings.sampler_view(stage, binding.index + element);
            let Some(SampledBinding {
                view,
                sampler,
            }) = bound
            else {
                self.require_null_descriptor(binding)?;
                self.reference::<crate::resource::image::SamplerView>(SlotKind::Object, slot, None);
                self.reference::<crate::sampler::Sampler>(SlotKind::Sampler, slot, None);
                if texel {
                    texels.push(vk::BufferView::null());
                } else {
                    images.push(null_image_info());
                }
                continue;
            };

            let resource = view.resource();
            let layout = match view.handle() {
                ViewHandle::Image(_) if resource.storage_image_bound() => vk::ImageLayout::GENERAL,
                ViewHandle::Image(_) => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ViewHandle::TexelBuffer(_) => vk::ImageLayout::UNDEFINED,
            };
            // Texel buffers are never sampled through a sampler.
            let sampler = if texel { None } else { sampler };

            match (view.handle(), texel) {
                (ViewHandle::TexelBuffer(handle), true) => texels.push(handle),
                (ViewHandle::Image(handle), false) => images.push(vk::DescriptorImageInfo {
                    sampler: sampler.as_ref().map_or(vk::Sampler::null(), |sampler| unsafe { sampler.handle() }),
                    image_view: handle,
                    image_layout: layout,
                }),
                (handle, _) => {
                    debug_assert!(false, "{handle:?} cannot be bound to a {:?} binding", binding.ty);
                    if texel {
                        texels.push(vk::BufferView::null());
                    } else {
                        images.push(null_image_info());
                    }
                }
            }

            if let Some(barriers) = self.barriers.as_mut() {
                barriers.add(resource, layout, vk::AccessFlags::SHADER_READ, stage.pipeline_stage());
            }
            self.reference(SlotKind::Object, slot, Some(view.as_ref()));
            self.reference(SlotKind::Sampler, slot, sampler.as_deref());

            self.batch.reference_object(TrackedObject::SamplerView(view.clone()));
            if let Some(sampler) = sampler {
                self.batch.reference_object(TrackedObject::Sampler(sampler));
            }
        }
        if texel {
            self.write(binding, DescriptorContents::TexelBuffer(texels));
        } else {
            self.write(binding, DescriptorContents::Image(images));
        }
        Ok(())
    }

    fn image(&mut self, stage: ShaderStage, binding: &ShaderBinding) -> Result<()> {
        debug_assert!(DescriptorType::Image.accepts(binding.ty));
        let texel = binding.ty == vk::DescriptorType::STORAGE_TEXEL_BUFFER;
        let mut images = Vec::new();
        let mut texels = Vec::new();
        for element in 0..binding.size {
            let slot = self.next_slot();
            let Some(view) = self.bindings.image_view(stage, binding.index + element) else {
                self.require_null_descriptor(binding)?;
                self.reference::<crate::resource::image::ImageView>(SlotKind::Object, slot, None);
                if texel {
                    texels.push(vk::BufferView::null());
                } else {
                    images.push(null_image_info());
                }
                continue;
            };

            let layout = match view.handle() {
                ViewHandle::Image(_) => vk::ImageLayout::GENERAL,
                ViewHandle::TexelBuffer(_) => vk::ImageLayout::UNDEFINED,
            };
            match (view.handle(), texel) {
                (ViewHandle::TexelBuffer(handle), true) => texels.push(handle),
                (ViewHandle::Image(handle), false) => images.push(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: handle,
                    image_layout: layout,
                }),
                (handle, _) => {
                    debug_assert!(false, "{handle:?} cannot be bound to a {:?} binding", binding.ty);
                    if texel {
                        texels.push(vk::BufferView::null());
                    } else {
                        images.push(null_image_info());
                    }
                }
            }

            if let (ViewHandle::Image(_), false) = (view.handle(), texel) {
                view.resource().mark_storage_image_bound();
            }
            self.reference(SlotKind::Object, slot, Some(view.as_ref()));
            if let Some(barriers) = self.barriers.as_mut() {
                barriers.add(view.resource(), layout, view.access(), stage.pipeline_stage());
            }
            self.batch.reference_object(TrackedObject::ImageView(view));
        }
        if texel {
            self.write(binding, DescriptorContents::TexelBuffer(texels));
        } else {
            self.write(binding, DescriptorContents::Image(images));
        }
        Ok(())
    }
}

fn buffer_info(bound: Option<&BufferBinding>, offset: vk::DeviceSize) -> vk::DescriptorBufferInfo {
    match bound {
        Some(bound) => vk::DescriptorBufferInfo {
            buffer: bound.resource.buffer_handle(),
            offset,
            range: bound.size,
        },
        None => vk::DescriptorBufferInfo {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        },
    }
}

fn null_image_info() -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo {
        sampler: vk::Sampler::null(),
        image_view: vk::ImageView::null(),
        image_layout: vk::ImageLayout::UNDEFINED,
    }
}
