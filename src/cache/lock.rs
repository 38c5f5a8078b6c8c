use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Acquire a shared guard on the index, recovering it if a writer panicked.
pub(crate) fn read_index<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "index may hold a partially written entry",
                "Recovered from poisoned cache index lock"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire an exclusive guard on the index, recovering it if a writer panicked.
pub(crate) fn write_index<'a, T>(
    lock: &'a RwLock<T>,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "index may hold a partially written entry",
                "Recovered from poisoned cache index lock"
            );
            poisoned.into_inner()
        }
    }
}
