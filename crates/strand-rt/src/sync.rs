// SPDX-License-Identifier: (MIT OR Apache-2.0)

use std::sync::{Mutex, MutexGuard};

/// Lock, recovering from poison.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
