use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::{OwnershipError, Result};
use crate::finalizer::{Adopted, Finalizer};
use crate::upcast::Upcast;

/// Sole ownership of a resource.
///
/// The handle is not `Clone`; ownership moves with the value. [`take`] is the
/// move that leaves an empty handle behind, and assigning over a handle
/// finalizes whatever it held. The finalizer moves together with the resource
/// on every transfer, including [`swap`] and [`upcast`].
///
/// [`take`]: ExclusiveOwner::take
/// [`swap`]: ExclusiveOwner::swap
/// [`upcast`]: ExclusiveOwner::upcast
pub struct ExclusiveOwner<T: ?Sized> {
    slot: Option<Adopted<T>>,
}

unsafe impl<T: ?Sized + Send> Send for ExclusiveOwner<T> {}
unsafe impl<T: ?Sized + Sync> Sync for ExclusiveOwner<T> {}

impl<T> ExclusiveOwner<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> ExclusiveOwner<T> {
    pub const fn empty() -> Self {
        Self { slot: None }
    }

    /// The null handle. Assigning it over a handle finalizes the old resource.
    pub const fn null() -> Self {
        Self::empty()
    }

    pub fn from_box(value: Box<T>) -> Self {
        Self {
            slot: Some(Adopted::from_box(value)),
        }
    }

    /// Adopts `ptr` with the default finalizer. A null `ptr` gives an empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must come from `Box::into_raw` and must not be owned elsewhere.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        unsafe { Self::from_raw_with(ptr, Finalizer::destroy()) }
    }

    /// # Safety
    ///
    /// A non-null `ptr` must stay valid until `finalizer` runs and must not be
    /// owned elsewhere.
    pub unsafe fn from_raw_with(ptr: *mut T, finalizer: Finalizer<T>) -> Self {
        Self {
            slot: unsafe { Adopted::from_raw(ptr, finalizer) },
        }
    }

    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.slot.as_ref().map(Adopted::resource)
    }

    pub fn try_get(&self) -> Result<&T> {
        match &self.slot {
            // SAFETY: the resource stays live while it sits in the slot.
            Some(adopted) => Ok(unsafe { adopted.resource().as_ref() }),
            None => Err(OwnershipError::Empty),
        }
    }

    pub fn try_get_mut(&mut self) -> Result<&mut T> {
        match &self.slot {
            Some(adopted) => {
                let mut resource = adopted.resource();
                // SAFETY: sole owner, borrowed mutably.
                Ok(unsafe { resource.as_mut() })
            }
            None => Err(OwnershipError::Empty),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Moves the resource and its finalizer out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        Self {
            slot: self.slot.take(),
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.slot, &mut other.slot);
    }

    /// Gives up the resource without finalizing it; the handle becomes empty.
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.slot.take().map(Adopted::into_raw)
    }

    pub fn reset(&mut self) {
        if let Some(adopted) = self.slot.take() {
            adopted.finalize();
        }
    }

    pub fn reset_to(&mut self, value: Box<T>) {
        self.reset();
        self.slot = Some(Adopted::from_box(value));
    }

    /// # Safety
    ///
    /// Same contract as [`ExclusiveOwner::from_raw`].
    pub unsafe fn reset_to_raw(&mut self, ptr: *mut T) {
        unsafe { self.reset_to_raw_with(ptr, Finalizer::destroy()) }
    }

    /// # Safety
    ///
    /// Same contract as [`ExclusiveOwner::from_raw_with`].
    pub unsafe fn reset_to_raw_with(&mut self, ptr: *mut T, finalizer: Finalizer<T>) {
        self.reset();
        self.slot = unsafe { Adopted::from_raw(ptr, finalizer) };
    }

    /// Move-assigns a handle over a subtype of `T` into this one.
    ///
    /// The resource held so far is finalized.
    pub fn assign_upcast<U>(&mut self, other: ExclusiveOwner<U>)
    where
        U: Upcast<T> + 'static,
        T: 'static,
    {
        let mut fresh = other.upcast();
        self.swap(&mut fresh);
    }
}

impl<T: 'static> ExclusiveOwner<T> {
    /// Transfers ownership into a handle over the base type `U`.
    ///
    /// Dropping the new handle still runs `T`'s full teardown.
    pub fn upcast<U>(mut self) -> ExclusiveOwner<U>
    where
        T: Upcast<U>,
        U: ?Sized + 'static,
    {
        ExclusiveOwner {
            slot: self.slot.take().map(Adopted::upcast),
        }
    }
}

impl<T: ?Sized> Deref for ExclusiveOwner<T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(resource) => resource,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T: ?Sized> DerefMut for ExclusiveOwner<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.try_get_mut() {
            Ok(resource) => resource,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T: ?Sized> Drop for ExclusiveOwner<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for ExclusiveOwner<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> From<Box<T>> for ExclusiveOwner<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized> PartialEq for ExclusiveOwner<T> {
    /// Pointer identity; the resources themselves are not compared.
    fn eq(&self, other: &Self) -> bool {
        match (self.get(), other.get()) {
            (Some(a), Some(b)) => std::ptr::addr_eq(a.as_ptr(), b.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ?Sized> Eq for ExclusiveOwner<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ExclusiveOwner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExclusiveOwner")
            .field(&self.try_get().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ExclusiveOwner;
    use crate::error::OwnershipError;
    use crate::finalizer::Finalizer;
    use std::ptr::NonNull;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    trait Base {
        fn action(&self) -> &'static str;
    }

    struct Derived1 {
        drops: Arc<AtomicUsize>,
    }

    impl Base for Derived1 {
        fn action(&self) -> &'static str {
            "perform action for Derived1"
        }
    }

    impl Drop for Derived1 {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Derived2 {
        log: Arc<Mutex<Vec<&'static str>>>,
        payload: Vec<u8>,
    }

    impl Base for Derived2 {
        fn action(&self) -> &'static str {
            "perform action for Derived2"
        }
    }

    impl Drop for Derived2 {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("Derived2 teardown");
        }
    }

    crate::impl_upcast!(Derived1 => dyn Base, Derived2 => dyn Base);

    fn logged(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Finalizer<i32> {
        let log = log.clone();
        Finalizer::new(move |p: NonNull<i32>| {
            drop(unsafe { Box::from_raw(p.as_ptr()) });
            log.lock().unwrap().push(tag);
        })
    }

    #[test]
    fn empty_and_null() {
        let mut up3: ExclusiveOwner<i32> = ExclusiveOwner::null();
        assert!(up3.is_empty());
        up3 = ExclusiveOwner::null();
        assert!(up3.is_empty());
        assert_eq!(up3.try_get(), Err(OwnershipError::Empty));
        assert_eq!(up3.release(), None);
        assert_eq!(up3, ExclusiveOwner::default());
    }

    #[test]
    #[should_panic(expected = "access through an empty handle")]
    fn deref_empty_panics() {
        let mut e: ExclusiveOwner<i32> = ExclusiveOwner::empty();
        *e = 1;
    }

    #[test]
    fn assigning_null_finalizes() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(1)), logged("one", &log)) };
        assert_eq!(*a, 1);
        a = ExclusiveOwner::null();
        assert!(a.is_empty());
        assert_eq!(*log.lock().unwrap(), ["one"]);
    }

    #[test]
    fn move_assign_finalizes_destination() {
        crate::init_test_logging();
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(8)), logged("eight", &log)) };
        assert_eq!(*a, 8);
        let b = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(6)), logged("six", &log)) };

        a = b;
        assert_eq!(*log.lock().unwrap(), ["eight"]);
        assert_eq!(*a, 6);

        drop(a);
        assert_eq!(*log.lock().unwrap(), ["eight", "six"]);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut a = ExclusiveOwner::new(6);
        let b = a.take();
        assert!(a.is_empty());
        assert!(!b.is_empty());
        assert_eq!(*b, 6);
    }

    #[test]
    fn finalizer_travels_with_the_resource() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(3)), logged("three", &log)) };
        let mut b = ExclusiveOwner::new(4);
        assert_eq!(*b, 4);

        b = a.take();
        drop(a);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*b, 3);
        drop(b);
        assert_eq!(*log.lock().unwrap(), ["three"]);
    }

    #[test]
    fn swap_exchanges_finalizers() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(1)), logged("a", &log)) };
        let mut b = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(2)), logged("b", &log)) };

        a.swap(&mut b);
        assert_eq!((*a, *b), (2, 1));
        drop(a);
        assert_eq!(*log.lock().unwrap(), ["b"]);
        drop(b);
        assert_eq!(*log.lock().unwrap(), ["b", "a"]);
    }

    #[test]
    fn release_skips_finalizer() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(5)), logged("five", &log)) };
        let raw = a.release().unwrap();
        assert!(a.is_empty());
        drop(a);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*unsafe { Box::from_raw(raw.as_ptr()) }, 5);
    }

    #[test]
    fn reset_finalizes_before_adopting() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut a = unsafe { ExclusiveOwner::from_raw_with(Box::into_raw(Box::new(1)), logged("first", &log)) };

        unsafe { a.reset_to_raw_with(Box::into_raw(Box::new(2)), logged("second", &log)) };
        assert_eq!(*log.lock().unwrap(), ["first"]);
        assert_eq!(*a, 2);

        a.reset_to(Box::new(3));
        assert_eq!(*log.lock().unwrap(), ["first", "second"]);

        unsafe { a.reset_to_raw(std::ptr::null_mut()) };
        assert!(a.is_empty());
        a.reset();
        assert!(a.is_empty());
    }

    #[test]
    fn deref_mut_writes_through() {
        let mut a = ExclusiveOwner::new(String::from("own"));
        a.push_str("er");
        assert_eq!(&*a, "owner");
        assert_eq!(format!("{a:?}"), "ExclusiveOwner(Some(\"owner\"))");
    }

    #[test]
    fn equality_is_identity() {
        let a = ExclusiveOwner::new(1);
        let b = ExclusiveOwner::new(1);
        assert_ne!(a, b);
        assert_ne!(a, ExclusiveOwner::empty());

        let raw = Box::into_raw(Box::new(7));
        let mut c = unsafe { ExclusiveOwner::from_raw(raw) };
        let mut d = unsafe { ExclusiveOwner::from_raw(raw) };
        assert_eq!(c, d);
        // only one of them may finalize
        let _ = d.release();
        c.reset();
    }

    #[test]
    fn upcast_dispatches_to_derived() {
        let drops = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(vec![]));

        let d1 = ExclusiveOwner::new(Derived1 { drops: drops.clone() });
        let d2 = ExclusiveOwner::new(Derived2 { log: log.clone(), payload: vec![1; 64] });
        let mut d3 = ExclusiveOwner::new(Derived2 { log: log.clone(), payload: vec![] });
        assert_eq!(d3.payload.len(), 0);
        d3.payload.push(9);

        let base1: ExclusiveOwner<dyn Base> = d1.upcast();
        let base2 = d2.upcast::<dyn Base>();
        let mut base3: ExclusiveOwner<dyn Base> = ExclusiveOwner::empty();
        base3.assign_upcast(d3);

        assert_eq!(base1.action(), "perform action for Derived1");
        assert_eq!(base2.action(), "perform action for Derived2");
        assert_eq!(base3.action(), "perform action for Derived2");

        drop(base1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(base2);
        drop(base3);
        assert_eq!(*log.lock().unwrap(), ["Derived2 teardown", "Derived2 teardown"]);
    }

    #[test]
    fn assign_upcast_finalizes_previous_base() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut base: ExclusiveOwner<dyn Base> = ExclusiveOwner::new(Derived1 { drops: drops.clone() }).upcast();

        base.assign_upcast(ExclusiveOwner::new(Derived1 { drops: drops.clone() }));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        base.assign_upcast(ExclusiveOwner::<Derived1>::empty());
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(base.is_empty());
    }

    #[test]
    fn upcast_keeps_custom_finalizer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let drops = Arc::new(AtomicUsize::new(0));
        let derived = Box::into_raw(Box::new(Derived1 { drops: drops.clone() }));
        let owner = unsafe {
            ExclusiveOwner::from_raw_with(
                derived,
                Finalizer::new(move |p: NonNull<Derived1>| {
                    c.fetch_add(1, Ordering::SeqCst);
                    drop(unsafe { Box::from_raw(p.as_ptr()) });
                }),
            )
        };

        let base: ExclusiveOwner<dyn Base> = owner.upcast();
        assert!(std::ptr::addr_eq(base.get().unwrap().as_ptr(), derived));
        drop(base);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn boxed_trait_object_uses_vtable_drop() {
        let drops = Arc::new(AtomicUsize::new(0));
        let boxed: Box<dyn Base> = Box::new(Derived1 { drops: drops.clone() });
        let owner = ExclusiveOwner::from(boxed);
        assert_eq!(owner.action(), "perform action for Derived1");
        drop(owner);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn moves_across_threads() {
        let mut a = ExclusiveOwner::new(vec![1, 2, 3]);
        let b = a.take();
        let sum = std::thread::spawn(move || b.iter().sum::<i32>()).join().unwrap();
        assert_eq!(sum, 6);
        assert!(a.is_empty());
    }
}
