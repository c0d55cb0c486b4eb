use std::ops::{Deref, DerefMut};

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Cooperative exclusive ownership over `T`, handed out in arrival order.
///
/// `tokio::sync::Mutex` queues waiters on a fair semaphore, so the head of
/// the queue is woken on release and re-polls for the permit itself. A waiter
/// that is woken can therefore never hold ownership alongside another caller.
/// Ownership is released when the guard drops, which covers every exit path
/// of the holder including `?` and unwinding.
pub(crate) struct OwnershipLock<T> {
    inner: Mutex<T>,
}

pub(crate) struct OwnershipGuard<'a, T> {
    inner: MutexGuard<'a, T>,
}

impl<T> OwnershipLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub async fn acquire(&self) -> OwnershipGuard<'_, T> {
        if let Some(guard) = self.try_acquire() {
            return guard;
        }
        trace!("ownership lock held, queueing");
        OwnershipGuard {
            inner: self.inner.lock().await,
        }
    }

    pub fn try_acquire(&self) -> Option<OwnershipGuard<'_, T>> {
        self.inner
            .try_lock()
            .ok()
            .map(|inner| OwnershipGuard { inner })
    }
}

impl<T> Deref for OwnershipGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for OwnershipGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
