//! Commit ordering for concurrently started asynchronous work.
//!
//! Each caller takes a [`Ticket`] synchronously, does its asynchronous work,
//! then waits for the ticket's [`Turn`] before touching shared state. Turns are
//! granted strictly in ticket order, regardless of which work finishes first.
//! A ticket that is dropped without taking its turn (work failed, caller gave
//! up) is skipped so later tickets are never blocked.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Default)]
struct SequencerState {
    /// Ticket currently allowed to commit.
    serving: u64,
    /// Next ticket id to hand out.
    next: u64,
    /// Tickets dropped before their turn came up.
    released: BTreeSet<u64>,
    /// Parked continuations, woken in ticket order.
    waiters: BTreeMap<u64, oneshot::Sender<()>>,
}

impl SequencerState {
    fn advance(&mut self) {
        self.serving += 1;
        while self.released.remove(&self.serving) {
            self.serving += 1;
        }
        if let Some(tx) = self.waiters.remove(&self.serving) {
            // A closed receiver means the waiter is being dropped; its ticket
            // drop will see `serving == id` and advance again.
            let _ = tx.send(());
        }
    }

    fn release(&mut self, id: u64) {
        self.waiters.remove(&id);
        if id == self.serving {
            self.advance();
        } else if id > self.serving {
            self.released.insert(id);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreationSequencer {
    state: Arc<Mutex<SequencerState>>,
}

impl CreationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket. Call order defines commit order.
    pub fn ticket(&self) -> Ticket {
        let mut state = self.state.lock();
        let id = state.next;
        state.next += 1;
        Ticket {
            id,
            state: Some(self.state.clone()),
        }
    }

    /// Number of tickets issued but not yet finished.
    pub fn outstanding(&self) -> u64 {
        let state = self.state.lock();
        state.next - state.serving
    }

    /// Run `work` now and apply `commit` to its result once every earlier
    /// ticket has committed or been released.
    ///
    /// The ticket is taken before this returns, so the order of `run` calls is
    /// the commit order even if the returned futures are polled out of order.
    /// Errors from `work` consume the ticket and propagate unchanged.
    pub fn run<W, T, E, C, R>(
        &self,
        work: W,
        commit: C,
    ) -> impl Future<Output = Result<R, E>> + use<W, T, E, C, R>
    where
        W: Future<Output = Result<T, E>>,
        C: FnOnce(T) -> R,
    {
        let ticket = self.ticket();
        async move {
            let value = work.await?;
            let _turn = ticket.turn().await;
            Ok(commit(value))
        }
    }
}

/// A place in the commit order.
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    state: Option<Arc<Mutex<SequencerState>>>,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until every earlier ticket has finished.
    ///
    /// Dropping the returned future before it completes releases the ticket.
    pub async fn turn(mut self) -> Turn {
        let rx = {
            let Some(state) = self.state.as_ref() else {
                return Turn {
                    id: self.id,
                    state: None,
                };
            };
            let mut guard = state.lock();
            if guard.serving == self.id {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                guard.waiters.insert(self.id, tx);
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // The sender only disappears together with the sequencer state,
            // which this ticket keeps alive.
            let _ = rx.await;
        }

        Turn {
            id: self.id,
            state: self.state.take(),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            debug!(ticket = self.id, "creation ticket released before its turn");
            state.lock().release(self.id);
        }
    }
}

/// Exclusive permission to commit; the next ticket is woken on drop.
#[derive(Debug)]
pub struct Turn {
    id: u64,
    state: Option<Arc<Mutex<SequencerState>>>,
}

impl Turn {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.lock().release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CreationSequencer;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>) -> impl FnOnce(&'static str) + Send {
        let log = log.clone();
        move |v| log.lock().push(v)
    }

    #[tokio::test]
    async fn commits_in_request_order_when_later_work_finishes_first() {
        let seq = CreationSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (release_a, gate_a) = oneshot::channel::<()>();

        let a = seq.run(
            async move {
                let _ = gate_a.await;
                Ok::<_, ()>("a")
            },
            recorder(&log),
        );
        let b = tokio::spawn(seq.run(async { Ok::<_, ()>("b") }, recorder(&log)));

        // B's work is done and it is parked behind A.
        tokio::task::yield_now().await;
        assert!(log.lock().is_empty());
        assert_eq!(seq.outstanding(), 2);

        release_a.send(()).expect("gate open");
        a.await.expect("a commits");
        b.await.expect("task").expect("b commits");
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(seq.outstanding(), 0);
    }

    #[tokio::test]
    async fn failed_work_consumes_its_ticket() {
        let seq = CreationSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = seq.run(async { Err::<&'static str, _>("boom") }, recorder(&log));
        let b = seq.run(async { Ok::<_, &'static str>("b") }, recorder(&log));

        assert_eq!(a.await, Err("boom"));
        assert_eq!(b.await, Ok(()));
        assert_eq!(*log.lock(), vec!["b"]);
    }

    #[tokio::test]
    async fn dropped_ticket_does_not_block_later_tickets() {
        let seq = CreationSequencer::new();
        let first = seq.ticket();
        let second = seq.ticket();
        drop(first);

        let turn = tokio::time::timeout(Duration::from_secs(1), second.turn())
            .await
            .expect("second ticket is served");
        assert_eq!(turn.id(), 1);
    }

    #[tokio::test]
    async fn cancelled_wait_releases_ticket() {
        let seq = CreationSequencer::new();
        let first = seq.ticket();
        let second = seq.ticket();
        let third = seq.ticket();

        // Second gives up while parked behind first.
        let waited = tokio::time::timeout(Duration::from_millis(5), second.turn()).await;
        assert!(waited.is_err());

        drop(first.turn().await);
        let turn = tokio::time::timeout(Duration::from_secs(1), third.turn())
            .await
            .expect("third ticket is served");
        assert_eq!(turn.id(), 2);
    }
}
