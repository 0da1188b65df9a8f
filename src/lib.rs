//! Descriptor set caching and pool allocation for Vulkan
//!
//! Deimos maps the current resource bindings of a shader program to Vulkan descriptor sets. Instead of allocating
//! and writing a fresh descriptor set on every draw or dispatch, sets are cached by the binding state they represent
//! and reused whenever that state comes back. Destroying a bound object invalidates exactly the sets that refer to it,
//! without ever scanning the cache.
//!
//! To get started, import the prelude
//! ```
//! use deimos::prelude::*;
//! ```
//!
//! # Example
//!
//! Deimos does not record or submit command buffers itself. The owner of the cache provides
//! - a [`DescriptorDevice`](crate::DescriptorDevice), which is implemented for [`ash::Device`],
//! - a [`BatchTracker`](crate::BatchTracker) that knows which descriptor sets outstanding GPU work still uses,
//! - a [`BindingSource`](crate::BindingSource) describing what is currently bound to every shader stage.
//!
//! ```ignore
//! use deimos::prelude::*;
//!
//! let settings = CacheSettingsBuilder::new()
//!     .max_sets_per_pool(1000)
//!     .null_descriptors(true)
//!     .build();
//! let mut cache = DescriptorCache::new(device.clone(), settings);
//! let fragment = ShaderInfo::new(ShaderStage::Fragment).with_binding(
//!     DescriptorType::SamplerView,
//!     ShaderBinding {
//!         binding: 0,
//!         ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
//!         size: 1,
//!         index: 0,
//!     },
//! );
//! let mut program = cache.create_program(vec![vertex, fragment], false)?;
//!
//! loop {
//!     // For every draw
//!     let persistent = cache.update_and_bind(&mut program, &mut batch, &bindings)?;
//!     // Once a batch retired on the GPU
//!     cache.release_sets(batch.retire());
//!     // Once per frame
//!     cache.next_frame();
//! }
//! ```
//!
//! For further details, check out the following modules
//! - [`descriptor`] for the cache itself.
//! - [`pipeline`] for programs and shader reflection info.
//! - [`resource`] for objects that can be bound to descriptors.
//! - [`core`] for the interfaces to the device and the batch layer.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod core;
pub mod descriptor;
pub mod pipeline;
pub mod resource;
pub mod sampler;
pub mod util;
