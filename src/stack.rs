//! Lock-free free-list holding idle connections

use crossbeam::epoch::{self, Atomic, Owned};
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// An idle connection together with the time it was last returned.
#[derive(Debug)]
pub(crate) struct PoolMember<C> {
    pub conn: C,
    pub last_access: Instant,
}

impl<C> PoolMember<C> {
    /// Wrap a connection returned right now.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            last_access: Instant::now(),
        }
    }

    /// Whether the member has been idle for longer than `timeout` as of `now`.
    pub fn is_idle_longer_than(&self, timeout: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > timeout
    }
}

struct Node<C> {
    member: ManuallyDrop<PoolMember<C>>,
    next: Atomic<Node<C>>,
}

/// Treiber stack of [`PoolMember`]s.
///
/// Unlinked nodes are reclaimed through `crossbeam::epoch`, so a `pop` that
/// loses a race never reads freed memory. `avail` is bumped before a node is
/// linked and dropped after it is unlinked, which keeps it from underflowing.
pub(crate) struct FreeList<C> {
    head: Atomic<Node<C>>,
    avail: AtomicUsize,
}

// SAFETY: members are only ever moved in and out by value; the stack never
// hands out shared references to a connection, so `C: Send` is enough.
unsafe impl<C: Send> Send for FreeList<C> {}
unsafe impl<C: Send> Sync for FreeList<C> {}

impl<C> FreeList<C> {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            avail: AtomicUsize::new(0),
        }
    }

    /// Link `member` as the new head.
    pub fn push(&self, member: PoolMember<C>) {
        let mut node = Owned::new(Node {
            member: ManuallyDrop::new(member),
            next: Atomic::null(),
        });

        self.avail.fetch_add(1, Ordering::Relaxed);

        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => return,
                Err(e) => node = e.new,
            }
        }
    }

    /// Unlink and return the head member, or `None` if the stack was empty
    /// when observed.
    pub fn pop(&self) -> Option<PoolMember<C>> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            // SAFETY: `head` was loaded under `guard`, so it cannot be freed
            // before the guard is dropped.
            let node = unsafe { head.as_ref() }?;
            let next = node.next.load(Ordering::Relaxed, &guard);

            if self
                .head
                .compare_exchange(head, next, Ordering::Acquire, Ordering::Relaxed, &guard)
                .is_ok()
            {
                self.avail.fetch_sub(1, Ordering::Relaxed);

                // SAFETY: the CAS unlinked `head`, so this thread is the only
                // one that will move the member out. The node itself is freed
                // once no pinned thread can still observe it, and its
                // `ManuallyDrop` keeps the member from being dropped twice.
                unsafe {
                    let member = ptr::read(&*node.member);
                    guard.defer_destroy(head);
                    return Some(member);
                }
            }
        }
    }

    /// Number of members currently linked (a snapshot).
    pub fn len(&self) -> usize {
        self.avail.load(Ordering::Acquire)
    }
}

impl<C> Default for FreeList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Drop for FreeList<C> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
