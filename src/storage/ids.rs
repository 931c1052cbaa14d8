use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Result, SedimentError, ShardId};

/// Usable identifier width. The sign bit stays clear so ids round-trip through
/// SQLite `INTEGER` columns and sort the same way there as in Rust.
pub const ID_BITS: u32 = 63;

/// Largest number of high bits that may be reserved for the shard tag.
pub const MAX_SHARD_BITS: u8 = 16;

/// Split of the identifier space between shard tag and per-shard counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShardLayout {
    shard_bits: u8,
}

impl ShardLayout {
    /// Reserves the top `shard_bits` identifier bits for the shard tag.
    pub fn new(shard_bits: u8) -> Result<Self> {
        if shard_bits > MAX_SHARD_BITS {
            return Err(SedimentError::Invalid("shard_bits must be at most 16"));
        }
        Ok(Self { shard_bits })
    }

    /// Layout of a non-sharded deployment: every bit belongs to the counter.
    pub const fn unsharded() -> Self {
        Self { shard_bits: 0 }
    }

    /// Number of bits holding the shard tag.
    pub fn shard_bits(&self) -> u8 {
        self.shard_bits
    }

    fn counter_bits(&self) -> u32 {
        ID_BITS - u32::from(self.shard_bits)
    }

    /// Largest counter value any shard may issue.
    pub fn max_counter(&self) -> u64 {
        (1u64 << self.counter_bits()) - 1
    }

    /// Largest shard tag representable in this layout.
    pub fn max_shard(&self) -> ShardId {
        if self.shard_bits == 0 {
            ShardId(0)
        } else {
            ShardId(((1u32 << self.shard_bits) - 1) as u16)
        }
    }

    /// Packs a shard tag and counter into an identifier.
    pub fn compose(&self, shard: ShardId, counter: u64) -> EntityId {
        debug_assert!(counter <= self.max_counter());
        EntityId((u64::from(shard.0) << self.counter_bits()) | counter)
    }

    /// Extracts the shard tag from an identifier.
    pub fn shard_of(&self, id: EntityId) -> ShardId {
        if self.shard_bits == 0 {
            return ShardId(0);
        }
        ShardId((id.0 >> self.counter_bits()) as u16)
    }

    /// Extracts the per-shard counter from an identifier.
    pub fn counter_of(&self, id: EntityId) -> u64 {
        id.0 & self.max_counter()
    }

    /// Every identifier the shard can ever issue.
    pub fn id_range(&self, shard: ShardId) -> RangeInclusive<u64> {
        self.compose(shard, 1).0..=self.compose(shard, self.max_counter()).0
    }
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self::unsharded()
    }
}

/// Monotonic, never-reusing identifier source for one shard.
///
/// The allocator is plain state owned by its [`crate::storage::Graph`]; there is
/// no process-wide singleton. `allocate` is lock-free and safe to call from
/// any number of threads.
#[derive(Debug)]
pub struct IdentityAllocator {
    layout: ShardLayout,
    shard: ShardId,
    limit: u64,
    next: AtomicU64,
}

impl IdentityAllocator {
    /// Creates an allocator whose first identifier has counter value 1.
    pub fn new(layout: ShardLayout, shard: ShardId) -> Result<Self> {
        Self::resume(layout, shard, None)
    }

    /// Creates an allocator that continues after `high_water`, the largest id
    /// this shard has already issued.
    pub fn resume(layout: ShardLayout, shard: ShardId, high_water: Option<EntityId>) -> Result<Self> {
        if shard > layout.max_shard() {
            return Err(SedimentError::Invalid("shard id does not fit the shard layout"));
        }
        let next = match high_water {
            None => 1,
            Some(id) => {
                if layout.shard_of(id) != shard {
                    return Err(SedimentError::Invalid(
                        "high-water id belongs to another shard",
                    ));
                }
                layout.counter_of(id) + 1
            }
        };
        Ok(Self {
            layout,
            shard,
            limit: layout.max_counter(),
            next: AtomicU64::new(next),
        })
    }

    /// Caps the largest counter value this allocator will issue.
    pub fn with_max_counter(mut self, limit: u64) -> Result<Self> {
        if limit == 0 || limit > self.layout.max_counter() {
            return Err(SedimentError::Invalid(
                "max counter must be within the layout's counter space",
            ));
        }
        self.limit = limit;
        Ok(self)
    }

    /// Issues the next identifier.
    ///
    /// Once the counter space is used up every call fails with
    /// [`SedimentError::AllocatorExhausted`]; the condition is permanent.
    pub fn allocate(&self) -> Result<EntityId> {
        let limit = self.limit;
        let counter = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current <= limit).then_some(current + 1)
            })
            .map_err(|_| SedimentError::AllocatorExhausted { shard: self.shard })?;
        Ok(self.layout.compose(self.shard, counter))
    }

    /// Moves the counter past `issued`, an id some writer has already used.
    ///
    /// Never moves the counter backwards.
    pub fn advance_past(&self, issued: EntityId) -> Result<()> {
        if self.layout.shard_of(issued) != self.shard {
            return Err(SedimentError::Invalid("issued id belongs to another shard"));
        }
        self.next
            .fetch_max(self.layout.counter_of(issued) + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Shard this allocator issues identifiers for.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Layout used to pack identifiers.
    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Number of identifiers left before exhaustion.
    pub fn remaining(&self) -> u64 {
        let next = self.next.load(Ordering::SeqCst);
        (self.limit + 1).saturating_sub(next)
    }
}
