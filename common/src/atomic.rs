use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Shorthand for atomics used as plain shared flags and counters.
///
/// All accesses are sequentially consistent, none of the users is hot enough
/// to care about weaker orderings.
pub trait EasyAtomic {
    type Item;

    fn get(&self) -> Self::Item;
    fn set(&self, value: Self::Item);
    /// Store the value and return the previous one.
    fn replace(&self, value: Self::Item) -> Self::Item;
}

macro_rules! easy_atomic {
    ($atomic:ty, $item:ty) => {
        impl EasyAtomic for $atomic {
            type Item = $item;

            fn get(&self) -> Self::Item {
                self.load(Ordering::SeqCst)
            }

            fn set(&self, value: Self::Item) {
                self.store(value, Ordering::SeqCst)
            }

            fn replace(&self, value: Self::Item) -> Self::Item {
                self.swap(value, Ordering::SeqCst)
            }
        }
    };
}

easy_atomic!(AtomicBool, bool);
easy_atomic!(AtomicU8, u8);
easy_atomic!(AtomicU32, u32);
easy_atomic!(AtomicU64, u64);
easy_atomic!(AtomicUsize, usize);
