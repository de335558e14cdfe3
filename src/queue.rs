//! Blocking multi-lane priority queue.
//!
//! Each [`ControlKind`] lane is an unbounded crossbeam channel. Consumers always drain the most
//! urgent non-empty lane first and fall back to a `Select` over the lanes when everything is
//! empty, so a pop blocks without holding any lock and wakes as soon as any producer pushes.
//! Within a lane items come out in push order.

use crate::priority::{ControlKind, KindTable, Prioritized};
use crossbeam_channel::{unbounded, Receiver, Select, SendError, Sender, TryRecvError};

/// Create a connected producer/consumer pair.
pub fn dispatch_queue<T>() -> (DispatchSender<T>, DispatchQueue<T>) {
    let lanes = KindTable::from_fn(|_| unbounded::<T>());
    let senders = KindTable::from_fn(|kind| lanes[kind].0.clone());
    let receivers = KindTable::from_fn(|kind| lanes[kind].1.clone());
    (DispatchSender { senders }, DispatchQueue { receivers })
}

/// Producer half. Cheap to clone; every worker holds one pointing at the scheduler.
pub struct DispatchSender<T> {
    senders: KindTable<Sender<T>>,
}

impl<T> Clone for DispatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
        }
    }
}

impl<T: Prioritized> DispatchSender<T> {
    /// Push an item onto its lane. Fails only once the consumer half has been dropped.
    pub fn push(&self, item: T) -> Result<(), SendError<T>> {
        self.senders[item.kind()].send(item)
    }
}

/// Consumer half. Owned by exactly one thread.
pub struct DispatchQueue<T> {
    receivers: KindTable<Receiver<T>>,
}

impl<T> DispatchQueue<T> {
    /// Pop the most urgent item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.receivers
            .iter()
            .find_map(|(_, receiver)| receiver.try_recv().ok())
    }

    /// Pop the most urgent item, blocking while every lane is empty.
    ///
    /// Returns `None` once all producers are gone and nothing is left to drain.
    pub fn pop(&self) -> Option<T> {
        loop {
            let mut disconnected = 0usize;
            for (_, receiver) in self.receivers.iter() {
                match receiver.try_recv() {
                    Ok(item) => return Some(item),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => disconnected += 1,
                }
            }
            if disconnected == ControlKind::ALL.len() {
                return None;
            }
            self.wait_for(&ControlKind::ALL);
        }
    }

    /// Block until at least one of `kinds` has an item (or is disconnected), without consuming.
    pub fn wait_for(&self, kinds: &[ControlKind]) {
        if kinds.is_empty() {
            return;
        }
        let mut select = Select::new();
        for kind in kinds {
            select.recv(&self.receivers[*kind]);
        }
        let _ = select.ready();
    }

    /// Number of items waiting on one lane.
    pub fn lane_len(&self, kind: ControlKind) -> usize {
        self.receivers[kind].len()
    }

    /// Whether any of `kinds` currently holds an item.
    pub fn has_pending(&self, kinds: &[ControlKind]) -> bool {
        kinds.iter().any(|kind| self.lane_len(*kind) > 0)
    }

    pub fn len(&self) -> usize {
        self.receivers.iter().map(|(_, receiver)| receiver.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
