//! # Sleep Lock
//!
//! Long-term lock for processes. A thread that finds the lock held parks
//! itself through [`Park`] instead of spinning, and is woken when the holder
//! lets go. The lock remembers which thread holds it so callers can assert
//! lock discipline with [`SleepLock::holding`].

use crate::{Park, ThreadId};
use alloc::collections::VecDeque;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use spin::Mutex;

/// Bookkeeping protected by the inner spinlock
struct LockState<K> {
    /// Is the lock held?
    locked: bool,
    /// Thread holding the lock
    holder: Option<ThreadId>,
    /// Threads parked on this lock, oldest first
    waiters: VecDeque<(ThreadId, K)>,
}

/// Blocking mutual exclusion lock.
pub struct SleepLock<T, P: Park> {
    /// Spinlock protecting this sleep lock
    state: Mutex<LockState<P::Token>>,
    /// Name of lock (for debugging)
    name: &'static str,
    /// Protected data
    data: UnsafeCell<T>,
    _park: PhantomData<fn() -> P>,
}

// SAFETY: access to `data` is serialized by `state.locked`.
unsafe impl<T: Send, P: Park> Sync for SleepLock<T, P> {}

impl<T, P: Park> SleepLock<T, P> {
    /// Create a new, unlocked sleep lock
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            state: Mutex::new(LockState {
                locked: false,
                holder: None,
                waiters: VecDeque::new(),
            }),
            name,
            data: UnsafeCell::new(data),
            _park: PhantomData,
        }
    }

    /// Acquire the lock, sleeping until it is available
    pub fn lock(&self) -> SleepLockGuard<'_, T, P> {
        let me = P::current_thread();
        loop {
            let mut state = self.state.lock();
            if !state.locked {
                state.locked = true;
                state.holder = Some(me);
                state.waiters.retain(|(id, _)| *id != me);
                return SleepLockGuard::new(self);
            }

            if state.holder == Some(me) {
                drop(state);
                log::error!("sleeplock {}: thread {} tried to re-acquire", self.name, me.as_u64());
                panic!("acquiresleep {}: already held", self.name);
            }

            // Spurious wakeups leave us registered already.
            if !state.waiters.iter().any(|(id, _)| *id == me) {
                state.waiters.push_back((me, P::token()));
            }
            drop(state);
            P::park();
        }
    }

    /// Acquire the lock only if nobody holds it
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T, P>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        state.holder = Some(P::current_thread());
        Some(SleepLockGuard::new(self))
    }

    /// Does the calling thread hold this lock?
    pub fn holding(&self) -> bool {
        let state = self.state.lock();
        state.locked && state.holder == Some(P::current_thread())
    }

    /// Is the lock held by anyone?
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of parked waiters
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Lock name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mutable access without locking; `&mut self` proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the lock and return the data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.locked = false;
        state.holder = None;
        let next = state.waiters.pop_front();
        drop(state);

        if let Some((_, token)) = next {
            P::unpark(token);
        }
    }
}

impl<T, P: Park> fmt::Debug for SleepLock<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Guard for a held [`SleepLock`]. Releases the lock when dropped.
///
/// The guard stays on the thread that took the lock.
pub struct SleepLockGuard<'a, T, P: Park> {
    lock: &'a SleepLock<T, P>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T, P: Park> SleepLockGuard<'a, T, P> {
    fn new(lock: &'a SleepLock<T, P>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The lock this guard belongs to
    pub fn lock(&self) -> &'a SleepLock<T, P> {
        self.lock
    }
}

impl<T, P: Park> Deref for SleepLockGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, P: Park> DerefMut for SleepLockGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, P: Park> Drop for SleepLockGuard<'_, T, P> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<T, P: Park> fmt::Debug for SleepLockGuard<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLockGuard")
            .field("name", &self.lock.name)
            .finish()
    }
}
