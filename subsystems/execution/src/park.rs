//! # Thread Parking
//!
//! The hook between blocking primitives and the scheduler.

use crate::ThreadId;

/// Scheduler hook used by sleeping primitives.
///
/// `park`/`unpark` must have token semantics: an `unpark` that arrives
/// before the target thread parks makes its next `park` return at once.
/// Without this a waiter that registers itself, drops its spinlock and is
/// then woken before it actually sleeps would sleep forever.
///
/// `park` may also return spuriously; callers re-check their condition.
pub trait Park: 'static {
    /// Handle used to wake a particular parked thread
    type Token: Send;

    /// Identity of the calling thread
    fn current_thread() -> ThreadId;

    /// Wake handle for the calling thread
    fn token() -> Self::Token;

    /// Suspend the calling thread until its token is unparked
    fn park();

    /// Wake the thread owning `token`
    fn unpark(token: Self::Token);
}

#[cfg(any(test, feature = "std"))]
mod hosted {
    use super::Park;
    use crate::ThreadId;
    use std::thread::{self, Thread};

    std::thread_local! {
        static CURRENT: ThreadId = ThreadId::new();
    }

    /// [`Park`] on top of host threads.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct StdPark;

    impl Park for StdPark {
        type Token = Thread;

        fn current_thread() -> ThreadId {
            CURRENT.with(|id| *id)
        }

        fn token() -> Thread {
            thread::current()
        }

        fn park() {
            thread::park();
        }

        fn unpark(token: Thread) {
            token.unpark();
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use hosted::StdPark;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_current_thread_is_stable() {
        let a = StdPark::current_thread();
        let b = StdPark::current_thread();
        assert_eq!(a, b);

        let other = thread::spawn(StdPark::current_thread).join().unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_unpark_before_park_does_not_block() {
        StdPark::unpark(StdPark::token());
        StdPark::park();
    }
}
