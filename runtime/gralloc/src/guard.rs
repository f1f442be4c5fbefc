//! Scoped plane acquisition
//!
//! A `PlaneTransaction` owns every resource acquired for one buffer until it
//! is committed. Dropping it without committing releases what it holds in
//! reverse acquisition order, so every early return in an allocator unwinds
//! its partial work.

use ion_platform::{HeapMask, IonFlags, PoolService, ResourceRef};

use crate::geometry::MAX_PLANES;
use crate::handle::Planes;
use crate::{GrallocError, Result};

pub(crate) struct PlaneTransaction<'a, P: PoolService + ?Sized> {
    pool: &'a P,
    align: usize,
    heap_mask: HeapMask,
    flags: IonFlags,
    primary: ResourceRef,
    secondary: [Option<ResourceRef>; MAX_PLANES - 1],
    committed: bool,
}

impl<'a, P: PoolService + ?Sized> PlaneTransaction<'a, P> {
    /// Allocate the primary plane and open a transaction around it
    ///
    /// # Errors
    /// The pool's error, unchanged. Nothing is held on failure.
    pub(crate) fn begin(
        pool: &'a P,
        align: usize,
        heap_mask: HeapMask,
        flags: IonFlags,
        primary_size: usize,
    ) -> Result<Self> {
        let primary = pool.allocate(primary_size, align, heap_mask, flags)?;

        Ok(Self {
            pool,
            align,
            heap_mask,
            flags,
            primary,
            secondary: [None; MAX_PLANES - 1],
            committed: false,
        })
    }

    /// Allocate the next chroma plane
    ///
    /// # Errors
    /// The pool's error, unchanged. Earlier planes stay held by the
    /// transaction and are released when it is dropped.
    pub(crate) fn acquire(&mut self, size: usize) -> Result<ResourceRef> {
        let Some(slot) = self.secondary.iter().position(Option::is_none) else {
            return Err(GrallocError::InvalidArgument {
                reason: "buffer has more planes than a handle can hold",
            });
        };

        let resource = self.pool.allocate(size, self.align, self.heap_mask, self.flags)?;
        self.secondary[slot] = Some(resource);

        Ok(resource)
    }

    /// Hand the acquired planes over to their new owner
    pub(crate) fn commit(mut self) -> Planes {
        self.committed = true;

        match self.secondary {
            [None, _] => Planes::Single(self.primary),
            [Some(b), None] => Planes::Dual(self.primary, b),
            [Some(b), Some(c)] => Planes::Triple(self.primary, b, c),
        }
    }
}

impl<P: PoolService + ?Sized> Drop for PlaneTransaction<'_, P> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let held = self.secondary.iter().rev().flatten().copied();
        for resource in held.chain(core::iter::once(self.primary)) {
            log::warn!("rolling back plane {}", resource);
            if let Err(e) = self.pool.release(resource) {
                log::warn!("release of {} during rollback failed: {}", resource, e);
            }
        }
    }
}
