//! Exposes the settings used to configure a [`DescriptorCache`](crate::DescriptorCache).

/// Default number of descriptor sets a single descriptor pool can hold. Pool sizes are scaled by this
/// value as well.
pub const DEFAULT_MAX_SETS_PER_POOL: u32 = 5000;
/// Default growth factor for descriptor set buckets.
pub const DEFAULT_BUCKET_FACTOR: u32 = 10;
/// Default number of valid sets to skip when searching the free index for an invalidated set.
pub const DEFAULT_MAX_FREE_SCAN: usize = 4;
/// Default number of frames a retired descriptor pool is kept before it is destroyed.
pub const DEFAULT_POOL_TTL: u32 = 8;

/// Settings for the descriptor cache.
///
/// # Example
/// ```
/// # use deimos::*;
/// let settings = CacheSettings {
///     null_descriptors: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum amount of descriptor sets a single descriptor pool will ever allocate. Once a pool reaches this
    /// capacity and has no sets left to reuse, lookups block on the GPU until sets are released.
    pub max_sets_per_pool: u32,
    /// Descriptor sets are allocated in buckets. The bucket size is the largest power of this factor that
    /// does not exceed the amount of sets already allocated from the pool.
    pub bucket_factor: u32,
    /// When evicting a set from the free index, at most this many valid sets are skipped while looking for an
    /// invalidated one.
    pub max_free_scan: usize,
    /// Whether the device supports null descriptors (`nullDescriptor` from `VK_EXT_robustness2`). When disabled,
    /// leaving a binding empty is an error.
    pub null_descriptors: bool,
    /// Amount of frames a descriptor pool that is no longer used by any program is kept alive before it is destroyed.
    pub pool_ttl: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_sets_per_pool: DEFAULT_MAX_SETS_PER_POOL,
            bucket_factor: DEFAULT_BUCKET_FACTOR,
            max_free_scan: DEFAULT_MAX_FREE_SCAN,
            null_descriptors: false,
            pool_ttl: DEFAULT_POOL_TTL,
        }
    }
}

/// The settings builder is a convenience struct to easily create [`CacheSettings`].
///
/// # Example
/// ```
/// # use deimos::*;
/// let settings = CacheSettingsBuilder::new()
///     .max_sets_per_pool(1000)
///     .null_descriptors(true)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct CacheSettingsBuilder {
    inner: CacheSettings,
}

impl CacheSettingsBuilder {
    /// Create a new settings builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum amount of descriptor sets per pool. At least one set is always allowed.
    pub fn max_sets_per_pool(mut self, max_sets: u32) -> Self {
        self.inner.max_sets_per_pool = max_sets.max(1);
        self
    }

    /// Sets the bucket growth factor. Factors smaller than two would never grow, so they are clamped.
    pub fn bucket_factor(mut self, factor: u32) -> Self {
        self.inner.bucket_factor = factor.max(2);
        self
    }

    /// Sets the maximum amount of valid sets skipped when evicting from the free index.
    pub fn max_free_scan(mut self, count: usize) -> Self {
        self.inner.max_free_scan = count;
        self
    }

    /// Enable or disable null descriptors.
    pub fn null_descriptors(mut self, enabled: bool) -> Self {
        self.inner.null_descriptors = enabled;
        self
    }

    /// Sets the amount of frames a retired pool stays alive.
    pub fn pool_ttl(mut self, frames: u32) -> Self {
        self.inner.pool_ttl = frames;
        self
    }

    /// Build the resulting settings.
    pub fn build(self) -> CacheSettings {
        self.inner
    }
}
