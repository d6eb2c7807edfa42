use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::upcast::Upcast;

/// The end-of-life action attached to a managed resource.
///
/// A finalizer travels with the resource it was attached to: it is moved along
/// on every transfer and consumed by the single call that ends the resource's
/// lifetime. Handles never run it for an empty slot, so a null resource is a
/// no-op by construction.
pub struct Finalizer<T: ?Sized> {
    kind: Kind<T>,
}

enum Kind<T: ?Sized> {
    Destroy,
    Custom(Box<dyn FnOnce(NonNull<T>) + Send>),
}

impl<T: ?Sized> Finalizer<T> {
    /// Reclaims the `Box` allocation the resource came from and drops the value.
    pub fn destroy() -> Self {
        Self {
            kind: Kind::Destroy,
        }
    }

    /// Runs `f` with the resource pointer once the resource reaches end-of-life.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(NonNull<T>) + Send + 'static,
    {
        Self {
            kind: Kind::Custom(Box::new(f)),
        }
    }

    pub fn is_destroy(&self) -> bool {
        matches!(self.kind, Kind::Destroy)
    }

    /// # Safety
    ///
    /// `resource` must be the live resource this finalizer was attached to, and
    /// for [`Finalizer::destroy`] it must have come from `Box::into_raw`.
    unsafe fn run(self, resource: NonNull<T>) {
        match self.kind {
            // SAFETY: upheld by the caller.
            Kind::Destroy => drop(unsafe { Box::from_raw(resource.as_ptr()) }),
            Kind::Custom(f) => f(resource),
        }
    }
}

impl<T: 'static> Finalizer<T> {
    /// Re-targets the finalizer at a base-typed pointer to the same object.
    ///
    /// The teardown still runs as `T`, whatever `U` the resource is later seen as.
    fn upcast<U: ?Sized + 'static>(self) -> Finalizer<U> {
        let kind = match self.kind {
            Kind::Destroy => Kind::Custom(Box::new(|base: NonNull<U>| {
                // SAFETY: `base` addresses the `Box<T>` allocation this finalizer was made for.
                drop(unsafe { Box::from_raw(base.cast::<T>().as_ptr()) })
            })),
            Kind::Custom(f) => Kind::Custom(Box::new(move |base: NonNull<U>| f(base.cast::<T>()))),
        };
        Finalizer { kind }
    }
}

impl<T: ?Sized> Default for Finalizer<T> {
    fn default() -> Self {
        Self::destroy()
    }
}

impl<T: ?Sized> fmt::Debug for Finalizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Destroy => f.write_str("Finalizer::Destroy"),
            Kind::Custom(_) => f.write_str("Finalizer::Custom"),
        }
    }
}

/// A resource pointer together with the finalizer responsible for it.
pub(crate) struct Adopted<T: ?Sized> {
    resource: NonNull<T>,
    finalizer: Finalizer<T>,
    _marker: PhantomData<T>,
}

impl<T: ?Sized> Adopted<T> {
    pub(crate) fn from_box(value: Box<T>) -> Self {
        Self {
            resource: NonNull::from(Box::leak(value)),
            finalizer: Finalizer::destroy(),
            _marker: PhantomData,
        }
    }

    /// Returns `None` for a null `ptr`; the finalizer is then dropped uncalled.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must stay valid until `finalizer` runs, and `finalizer`
    /// must be able to end its lifetime.
    pub(crate) unsafe fn from_raw(ptr: *mut T, finalizer: Finalizer<T>) -> Option<Self> {
        NonNull::new(ptr).map(|resource| Self {
            resource,
            finalizer,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub(crate) fn resource(&self) -> NonNull<T> {
        self.resource
    }

    pub(crate) fn finalize(self) {
        log::trace!(
            "finalizing resource at {:p} ({:?})",
            self.resource,
            self.finalizer
        );
        // SAFETY: the pair was built by `from_box` or under the `from_raw` contract.
        unsafe { self.finalizer.run(self.resource) }
    }

    /// Gives up the resource without running the finalizer.
    pub(crate) fn into_raw(self) -> NonNull<T> {
        log::trace!("releasing resource at {:p} unfinalized", self.resource);
        self.resource
    }
}

impl<T: 'static> Adopted<T> {
    pub(crate) fn upcast<U>(self) -> Adopted<U>
    where
        T: Upcast<U>,
        U: ?Sized + 'static,
    {
        Adopted {
            resource: T::upcast_ptr(self.resource),
            finalizer: self.finalizer.upcast(),
            _marker: PhantomData,
        }
    }
}
