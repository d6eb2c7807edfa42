mod error;
mod exclusive;
mod finalizer;
mod shared;
mod upcast;

pub use error::{OwnershipError, Result};
pub use exclusive::ExclusiveOwner;
pub use finalizer::Finalizer;
pub use shared::{SharedOwner, make_shared};
pub use upcast::Upcast;

/*
# SharedOwner
## Multiple Ownership:
Any number of handles co-own one resource through a control block holding an atomic count,
the resource pointer and its finalizer.

## Last One Out Finalizes:
The finalizer runs exactly once, when the count drops from 1 to 0. Handles can be cloned and
dropped on different threads; a single handle is only mutated through &mut.

## Release Needs Uniqueness:
release() hands the raw resource back without finalizing, and refuses while other handles exist.

# ExclusiveOwner
## Single Ownership:
Not Clone. Moving the handle moves the resource together with its finalizer; take() leaves an
empty handle behind, assigning over a handle finalizes what it held.

## Upcast:
A handle over Derived converts into a handle over dyn Base when Derived: Upcast<dyn Base>
(see impl_upcast!). Dropping the base handle still tears the value down as Derived.

# Finalizer
## Exactly Once:
An FnOnce attached to one resource; the default reclaims a Box. Empty handles never call it.
*/

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
