use std::ptr::NonNull;

/// Marks `Self` as a subtype of `U`: a pointer to `Self` may be viewed as a
/// pointer to `U` addressing the same object.
///
/// Prefer [`impl_upcast!`](crate::impl_upcast), which only compiles when the
/// conversion is an unsized coercion such as `Derived -> dyn Base`.
///
/// # Safety
///
/// `upcast_ptr` must return a pointer to the very object it was given, with
/// metadata that describes that object.
pub unsafe trait Upcast<U: ?Sized>: Sized {
    fn upcast_ptr(ptr: NonNull<Self>) -> NonNull<U>;
}

/// Implements [`Upcast`] for each `Derived => Base` pair.
///
/// ```
/// use owners::{impl_upcast, ExclusiveOwner};
///
/// trait Shape {
///     fn sides(&self) -> u32;
/// }
///
/// struct Square;
/// impl Shape for Square {
///     fn sides(&self) -> u32 {
///         4
///     }
/// }
///
/// impl_upcast!(Square => dyn Shape);
///
/// let shape: ExclusiveOwner<dyn Shape> = ExclusiveOwner::new(Square).upcast();
/// assert_eq!(shape.sides(), 4);
/// ```
///
/// A type that does not implement the base trait is rejected at compile time:
///
/// ```compile_fail
/// use owners::impl_upcast;
///
/// trait Shape {}
/// struct Circle;
///
/// impl_upcast!(Circle => dyn Shape);
/// ```
#[macro_export]
macro_rules! impl_upcast {
    ($($derived:ty => $base:ty),+ $(,)?) => {
        $(
            // SAFETY: the body is an unsized coercion, which keeps the address.
            unsafe impl $crate::Upcast<$base> for $derived {
                #[inline]
                fn upcast_ptr(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$base> {
                    ptr
                }
            }
        )+
    };
}
