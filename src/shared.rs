use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

use crate::error::{OwnershipError, Result};
use crate::finalizer::{Adopted, Finalizer};

const MAX_OWNERS: usize = isize::MAX as usize;

/// Reference-counted ownership of a resource.
///
/// Every clone joins the same ownership class: one control block holding the
/// owner count, the resource pointer and the finalizer. The finalizer runs once,
/// when the count goes from 1 to 0.
///
/// Distinct handles may be cloned and dropped from different threads. A single
/// handle is mutated through `&mut self` only.
pub struct SharedOwner<T: ?Sized> {
    block: Option<NonNull<ControlBlock<T>>>,
    _marker: PhantomData<ControlBlock<T>>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for SharedOwner<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedOwner<T> {}

struct ControlBlock<T: ?Sized> {
    owners: AtomicUsize,
    adopted: Adopted<T>,
}

/// Builds the resource and wraps it in a fresh [`SharedOwner`].
pub fn make_shared<T>(value: T) -> SharedOwner<T> {
    SharedOwner::new(value)
}

impl<T> SharedOwner<T> {
    pub fn new(value: T) -> SharedOwner<T> {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> SharedOwner<T> {
    pub const fn empty() -> Self {
        Self {
            block: None,
            _marker: PhantomData,
        }
    }

    pub fn from_box(value: Box<T>) -> Self {
        Self::adopt(Some(Adopted::from_box(value)))
    }

    /// Adopts `ptr` with the default finalizer. A null `ptr` gives an empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must come from `Box::into_raw` and must not be owned elsewhere.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        unsafe { Self::from_raw_with(ptr, Finalizer::destroy()) }
    }

    /// Adopts `ptr`, to be ended by `finalizer`. A null `ptr` gives an empty
    /// handle and `finalizer` is dropped without being called.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must stay valid until `finalizer` runs and must not be
    /// owned elsewhere.
    pub unsafe fn from_raw_with(ptr: *mut T, finalizer: Finalizer<T>) -> Self {
        Self::adopt(unsafe { Adopted::from_raw(ptr, finalizer) })
    }

    fn adopt(adopted: Option<Adopted<T>>) -> Self {
        let block = adopted.map(|adopted| {
            let block = Box::new(ControlBlock {
                owners: AtomicUsize::new(1),
                adopted,
            });
            let block = NonNull::from(Box::leak(block));
            log::trace!("new control block at {:p}", block);
            block
        });
        Self {
            block,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> Option<&ControlBlock<T>> {
        // SAFETY: a block stays allocated while this handle counts as one of its owners.
        self.block.map(|block| unsafe { block.as_ref() })
    }

    /// Raw resource pointer, without touching ownership.
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.inner().map(|inner| inner.adopted.resource())
    }

    pub fn try_get(&self) -> Result<&T> {
        match self.inner() {
            // SAFETY: the resource lives as long as the block that owns it.
            Some(inner) => Ok(unsafe { inner.adopted.resource().as_ref() }),
            None => Err(OwnershipError::Empty),
        }
    }

    /// Mutable access, available only while this handle is the sole owner.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let inner = self.inner()?;
        if inner.owners.load(Ordering::Acquire) != 1 {
            return None;
        }
        let mut resource = inner.adopted.resource();
        // SAFETY: no other handle can reach the resource and `self` is borrowed mutably.
        Some(unsafe { resource.as_mut() })
    }

    /// Number of handles in this ownership class; 0 for an empty handle.
    pub fn owner_count(&self) -> usize {
        self.inner()
            .map_or(0, |inner| inner.owners.load(Ordering::Acquire))
    }

    pub fn is_unique(&self) -> bool {
        self.owner_count() <= 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Whether both handles belong to the same ownership class.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block == other.block
    }

    /// Leaves the ownership class; the handle becomes empty.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            // SAFETY: `block` was this handle's share of the class.
            unsafe { Self::leave(block) };
        }
    }

    pub fn reset_to(&mut self, value: Box<T>) {
        self.reset();
        *self = Self::from_box(value);
    }

    /// # Safety
    ///
    /// Same contract as [`SharedOwner::from_raw`].
    pub unsafe fn reset_to_raw(&mut self, ptr: *mut T) {
        unsafe { self.reset_to_raw_with(ptr, Finalizer::destroy()) }
    }

    /// # Safety
    ///
    /// Same contract as [`SharedOwner::from_raw_with`].
    pub unsafe fn reset_to_raw_with(&mut self, ptr: *mut T, finalizer: Finalizer<T>) {
        self.reset();
        *self = unsafe { Self::from_raw_with(ptr, finalizer) };
    }

    /// Hands the resource back to the caller without finalizing it.
    ///
    /// Only the sole owner may do this. While other handles share the resource
    /// the call fails and nothing changes. An empty handle yields `Ok(None)`.
    pub fn release(&mut self) -> Result<Option<NonNull<T>>> {
        let Some(block) = self.block else {
            return Ok(None);
        };
        // SAFETY: `self` still owns a share of the block.
        let owners = &unsafe { block.as_ref() }.owners;
        if let Err(owners) = owners.compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed) {
            log::debug!("refusing to release resource shared by {owners} owners");
            return Err(OwnershipError::Shared { owners });
        }
        self.block = None;
        // SAFETY: the count was 1 and `self` held it, so nobody else can reach the block.
        let ControlBlock { adopted, .. } = *unsafe { Box::from_raw(block.as_ptr()) };
        Ok(Some(adopted.into_raw()))
    }

    fn join(&self) -> Option<NonNull<ControlBlock<T>>> {
        let inner = self.inner()?;
        let old = inner.owners.fetch_add(1, Ordering::Relaxed);
        if old > MAX_OWNERS {
            std::process::abort();
        }
        self.block
    }

    /// Drops one share of `block`, finalizing the resource if it was the last.
    ///
    /// # Safety
    ///
    /// The caller must own a share of `block` and must not use it afterwards.
    unsafe fn leave(block: NonNull<ControlBlock<T>>) {
        let inner = unsafe { block.as_ref() };
        if inner.owners.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            log::trace!("last owner left control block at {:p}", block);
            let ControlBlock { adopted, .. } = *unsafe { Box::from_raw(block.as_ptr()) };
            adopted.finalize();
        }
    }
}

impl<T: ?Sized> Clone for SharedOwner<T> {
    fn clone(&self) -> Self {
        Self {
            block: self.join(),
            _marker: PhantomData,
        }
    }

    /// Leaves the current class before joining `source`'s.
    fn clone_from(&mut self, source: &Self) {
        if self.ptr_eq(source) {
            return;
        }
        self.reset();
        self.block = source.join();
    }
}

impl<T: ?Sized> std::ops::Deref for SharedOwner<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self.try_get() {
            Ok(resource) => resource,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T: ?Sized> Drop for SharedOwner<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for SharedOwner<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> From<Box<T>> for SharedOwner<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedOwner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedOwner")
            .field("resource", &self.try_get().ok())
            .field("owners", &self.owner_count())
            .finish()
    }
}
