//! Mock pool service and view mapper
//!
//! `MockIon` stands in for the ION device in tests and in the probe tool's
//! dry-run mode. It hands out increasing descriptor numbers, records every
//! request, and can be told to fail a specific allocation or attach call so
//! rollback paths can be exercised.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{
    HeapMask, IonFlags, MappedView, PoolError, PoolService, RawResource, ResourceRef, Result,
    ViewMapper,
};

/// First descriptor number handed out by the mock
pub const FIRST_MOCK_FD: RawResource = 100;

/// Base virtual address of mock views
pub const MOCK_VIEW_BASE: usize = 0x7000_0000;

/// One recorded allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockAllocation {
    pub resource: ResourceRef,
    pub len: usize,
    pub align: usize,
    pub heap_mask: HeapMask,
    pub flags: IonFlags,
}

#[derive(Default)]
struct MockState {
    next_fd: RawResource,
    next_vaddr: usize,

    /// Resources allocated and not yet released
    live: BTreeMap<RawResource, MockAllocation>,

    /// Every successful allocation, in call order
    history: Vec<MockAllocation>,

    /// Release calls, in call order (including rejected ones)
    releases: Vec<ResourceRef>,

    allocate_calls: usize,
    attach_calls: usize,
    detach_calls: usize,

    /// 1-based allocate call number that must fail
    fail_allocate_at: Option<usize>,
    fail_next_attach: bool,

    /// Remaining bytes, if the pool is bounded
    capacity: Option<usize>,
}

/// Recording pool service and view mapper
pub struct MockIon {
    state: Mutex<MockState>,
}

impl Default for MockIon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIon {
    /// Create an unbounded mock pool
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_fd: FIRST_MOCK_FD,
                next_vaddr: MOCK_VIEW_BASE,
                ..MockState::default()
            }),
        }
    }

    /// Create a mock pool that refuses requests once `bytes` are outstanding
    pub fn with_capacity(bytes: usize) -> Self {
        let ion = Self::new();
        ion.state.lock().capacity = Some(bytes);
        ion
    }

    /// Make the `n`th allocate call from now fail (1-based)
    pub fn fail_allocation_at(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_allocate_at = Some(state.allocate_calls + n);
    }

    /// Make the next attach call fail
    pub fn fail_next_attach(&self) {
        self.state.lock().fail_next_attach = true;
    }

    /// Number of allocate calls, including failed ones
    pub fn allocate_calls(&self) -> usize {
        self.state.lock().allocate_calls
    }

    /// Number of release calls
    pub fn release_calls(&self) -> usize {
        self.state.lock().releases.len()
    }

    /// Resources passed to release, in call order
    pub fn released(&self) -> Vec<ResourceRef> {
        self.state.lock().releases.clone()
    }

    /// Successful allocations, in call order
    pub fn allocations(&self) -> Vec<MockAllocation> {
        self.state.lock().history.clone()
    }

    /// Resources currently outstanding
    pub fn live_resources(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn attach_calls(&self) -> usize {
        self.state.lock().attach_calls
    }

    pub fn detach_calls(&self) -> usize {
        self.state.lock().detach_calls
    }

    /// Look up a live resource
    pub fn allocation(&self, resource: ResourceRef) -> Option<MockAllocation> {
        self.state.lock().live.get(&resource.as_raw()).copied()
    }
}

impl PoolService for MockIon {
    fn allocate(
        &self,
        len: usize,
        align: usize,
        heap_mask: HeapMask,
        flags: IonFlags,
    ) -> Result<ResourceRef> {
        let mut state = self.state.lock();
        state.allocate_calls += 1;

        let exhausted = PoolError::Exhausted {
            requested: len,
            heap_mask: heap_mask.bits(),
        };

        if state.fail_allocate_at == Some(state.allocate_calls) {
            state.fail_allocate_at = None;
            return Err(exhausted);
        }

        if let Some(remaining) = state.capacity {
            if remaining < len {
                return Err(exhausted);
            }
            state.capacity = Some(remaining - len);
        }

        let resource = ResourceRef::from_raw(state.next_fd);
        state.next_fd += 1;

        let record = MockAllocation {
            resource,
            len,
            align,
            heap_mask,
            flags,
        };
        state.live.insert(resource.as_raw(), record);
        state.history.push(record);

        Ok(resource)
    }

    fn release(&self, resource: ResourceRef) -> Result<()> {
        let mut state = self.state.lock();
        state.releases.push(resource);

        let record = state
            .live
            .remove(&resource.as_raw())
            .ok_or(PoolError::UnknownResource(resource.as_raw()))?;

        if let Some(remaining) = state.capacity.as_mut() {
            *remaining += record.len;
        }

        Ok(())
    }
}

impl ViewMapper for MockIon {
    fn attach(&self, resource: ResourceRef, len: usize) -> Result<MappedView> {
        let mut state = self.state.lock();
        state.attach_calls += 1;

        if state.fail_next_attach {
            state.fail_next_attach = false;
            return Err(PoolError::Map {
                resource: resource.as_raw(),
                errno: 12, // ENOMEM
            });
        }

        if !state.live.contains_key(&resource.as_raw()) {
            return Err(PoolError::UnknownResource(resource.as_raw()));
        }

        let base = state.next_vaddr;
        state.next_vaddr += len.max(1);

        Ok(MappedView { base, len })
    }

    fn detach(&self, _view: MappedView) {
        self.state.lock().detach_calls += 1;
    }
}
