//! A wrapper around the `core::sync::atomic` types.
//!
//! Atomic types provide primitive shared-memory communication between
//! threads, and are the building blocks of other concurrent types. The
//! wrappers in this module fix the memory ordering to `SeqCst`, the only
//! ordering this kernel reasons about, so call sites do not repeat it.

use core::sync::atomic::Ordering;

macro_rules! atomic_wrapper {
    ($(#[$doc:meta])* $name:ident, $inner:ty, $prim:ty) => {
        $(#[$doc])*
        #[derive(Default)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new atomic value.
            #[inline]
            #[must_use]
            pub const fn new(v: $prim) -> Self {
                Self(<$inner>::new(v))
            }

            /// Loads the value.
            #[inline]
            pub fn load(&self) -> $prim {
                self.0.load(Ordering::SeqCst)
            }

            /// Stores a value.
            #[inline]
            pub fn store(&self, v: $prim) {
                self.0.store(v, Ordering::SeqCst)
            }

            /// Stores a value, returning the previous value.
            #[inline]
            pub fn swap(&self, v: $prim) -> $prim {
                self.0.swap(v, Ordering::SeqCst)
            }
        }
    };
}

macro_rules! atomic_int_ops {
    ($name:ident, $prim:ty) => {
        impl $name {
            /// Adds to the current value, returning the previous value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_add(&self, v: $prim) -> $prim {
                self.0.fetch_add(v, Ordering::SeqCst)
            }

            /// Subtracts from the current value, returning the previous
            /// value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_sub(&self, v: $prim) -> $prim {
                self.0.fetch_sub(v, Ordering::SeqCst)
            }
        }
    };
}

atomic_wrapper!(
    /// A boolean type which can be safely shared between threads.
    AtomicBool,
    core::sync::atomic::AtomicBool,
    bool
);
atomic_wrapper!(
    /// An integer type which can be safely shared between threads.
    AtomicU32,
    core::sync::atomic::AtomicU32,
    u32
);
atomic_wrapper!(
    /// An integer type which can be safely shared between threads.
    AtomicU64,
    core::sync::atomic::AtomicU64,
    u64
);
atomic_wrapper!(
    /// An integer type which can be safely shared between threads.
    AtomicUsize,
    core::sync::atomic::AtomicUsize,
    usize
);

atomic_int_ops!(AtomicU32, u32);
atomic_int_ops!(AtomicU64, u64);
atomic_int_ops!(AtomicUsize, usize);

impl AtomicBool {
    /// Logical "or" with the current value, returning the previous value.
    #[inline]
    pub fn fetch_or(&self, v: bool) -> bool {
        self.0.fetch_or(v, Ordering::SeqCst)
    }
}
