//! Exposes the deimos error type

use std::collections::TryReserveError;

use ash;
use thiserror::Error;

use crate::descriptor::DescriptorType;

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(ash::vk::Result),
    /// Creating the native descriptor set layout or descriptor pool failed. No partially created
    /// pool is kept around.
    #[error("Failed to create descriptor pool for descriptor type {0:?}")]
    PoolCreationFailed(DescriptorType),
    /// The descriptor pool is at capacity and waiting for the GPU did not give back a single set.
    #[error("Descriptor pool for descriptor type {0:?} is exhausted and no sets could be reclaimed")]
    PoolExhausted(DescriptorType),
    /// Growing cache bookkeeping failed.
    #[error("Out of host memory while growing descriptor cache bookkeeping")]
    OutOfHostMemory,
    /// A binding had nothing bound to it, but null descriptors are not enabled.
    #[error("Nothing bound to binding {binding} and null descriptors are not enabled")]
    NullDescriptorUnsupported {
        /// Binding number inside the descriptor set.
        binding: u32,
    },
    /// A program was used that has no descriptor pool for the requested descriptor type.
    #[error("Program has no descriptor pool for descriptor type {0:?}")]
    NoDescriptorPool(DescriptorType),
    /// A set handle referred to a pool or set that does not exist (anymore).
    #[error("Descriptor set handle does not refer to a live descriptor set")]
    InvalidSetHandle,
    /// The shader stages given to a program do not form a valid graphics or compute program.
    #[error("Invalid shader stages for program: `{0}`")]
    InvalidProgram(&'static str),
}

impl From<ash::vk::Result> for Error {
    fn from(value: ash::vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfHostMemory
    }
}
