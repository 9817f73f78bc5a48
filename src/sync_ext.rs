use std::sync::{Mutex, MutexGuard, PoisonError};

/// Extension trait for `Mutex<T>` to provide `lock_unpoisoned`
pub trait MutexExt<T> {
    fn lock_unpoisoned(&self) -> MutexGuard<T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    // A panic while holding the database connection leaves SQLite itself consistent, so the lock is still usable
    fn lock_unpoisoned(&self) -> MutexGuard<T> {
        self.lock().unwrap_or_else(|err| {
            self.clear_poison();
            PoisonError::into_inner(err)
        })
    }
}
