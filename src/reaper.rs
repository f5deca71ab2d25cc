//! Background reclamation of idle connections

use crate::connection::Connection;
use crate::stack::{FreeList, PoolMember};

use crossbeam::channel::{self, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result of a single reap sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ReapOutcome {
    /// Members kept in the pool
    pub kept: usize,
    /// Members evicted and closed
    pub evicted: usize,
    /// Evicted members whose close failed
    pub close_failures: usize,
}

/// Evict every member of `free` that has been idle longer than `timeout`.
///
/// The stack has no mid-chain removal, so the sweep pops everything,
/// closes what is stale and pushes the rest back oldest-first. Survivors keep
/// their original timestamps and relative order. Concurrent `get`s during a
/// sweep simply miss.
///
/// While the stack is empty, `put` accepts connections it would otherwise
/// reject, so survivors are only pushed back while the stack holds fewer than
/// `max_cap` members. The oldest surplus survivors are closed instead.
pub(crate) fn reap_idle<C: Connection>(
    free: &FreeList<C>,
    timeout: Duration,
    max_cap: usize,
    now: Instant,
) -> ReapOutcome {
    let mut outcome = ReapOutcome::default();
    if timeout.is_zero() {
        return outcome;
    }

    let mut keep: Vec<PoolMember<C>> = Vec::with_capacity(free.len());
    while let Some(member) = free.pop() {
        if member.is_idle_longer_than(timeout, now) {
            evict(member, &mut outcome);
        } else {
            keep.push(member);
        }
    }

    // `keep` is newest first, so the surplus past `room` is the oldest.
    let room = max_cap.saturating_sub(free.len()).min(keep.len());
    for member in keep.split_off(room).into_iter().rev() {
        evict(member, &mut outcome);
    }

    for member in keep.into_iter().rev() {
        if free.len() < max_cap {
            free.push(member);
            outcome.kept += 1;
        } else {
            evict(member, &mut outcome);
        }
    }
    outcome
}

fn evict<C: Connection>(member: PoolMember<C>, outcome: &mut ReapOutcome) {
    outcome.evicted += 1;
    if let Err(e) = member.conn.close() {
        outcome.close_failures += 1;
        tracing::warn!(error = %e, "Failed to close reaped connection");
    }
}

/// Handle to the reaper thread.
///
/// Dropping the `dying` sender tells the loop to stop; joining the thread is
/// the acknowledgement that it has.
pub(crate) struct Reaper {
    dying: Sender<()>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Start a thread that calls `on_tick` every `interval` until shut down.
    pub fn spawn<F>(interval: Duration, on_tick: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (dying, dying_rx) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("connpool-reaper".to_string())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    crossbeam::select! {
                        recv(dying_rx) -> _ => break,
                        recv(ticker) -> _ => on_tick(),
                    }
                }
                tracing::trace!("Reaper loop terminated");
            })?;

        Ok(Self { dying, handle })
    }

    /// Signal the loop to stop and wait for it to exit.
    pub fn shutdown(self) {
        drop(self.dying);
        if self.handle.join().is_err() {
            tracing::warn!("Reaper thread panicked before shutdown");
        }
    }
}
