//! Bridge between the store's callback-driven AIO interface and the
//! request task.
//!
//! Each worker lane owns one [`AioSlot`]. Arming the slot advances its
//! generation counter and pairs a completion callback (handed to the
//! store) with an awaitable. The callback may fire on a store-internal
//! thread at any point, possibly long after the awaiter gave up, so
//! delivery is gated on the generation counter: a completion whose
//! snapshot no longer matches the slot is dropped on the floor.

use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::store::{AioComplete, StoreError, StoreResult};

/// Per-lane bookkeeping for one in-flight AIO.
pub(crate) struct AioSlot {
    // Generation counter, strictly increasing for the process lifetime.
    rid: Mutex<u64>,
}

/// The awaitable half of an armed slot. Owned by the request task; the
/// matching sender lives inside the completion callback.
pub(crate) struct Armed<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl AioSlot {
    fn new() -> AioSlot {
        AioSlot { rid: Mutex::new(0) }
    }

    /// Advance the generation counter and produce a paired awaitable and
    /// completion callback. The dispatcher runs at most one request per
    /// lane, so at most one issuance is in flight per slot.
    pub(crate) fn arm<T: Send + 'static>(self: &Arc<Self>) -> (Armed<T>, AioComplete<T>) {
        let snapshot = {
            let mut rid = self.rid.lock();
            *rid += 1;
            *rid
        };

        let (tx, rx) = oneshot::channel();
        let slot = self.clone();
        let done: AioComplete<T> = Box::new(move |result| {
            // Hold the lock across the send so delivery is serialized
            // against the next arm() on this slot.
            let rid = slot.rid.lock();
            if *rid == snapshot {
                let _ = tx.send(result);
            } else {
                debug!("aio completion {} woke up too late", snapshot);
            }
            drop(rid);
        });

        (Armed { rx }, done)
    }

    #[cfg(test)]
    fn current_rid(&self) -> u64 {
        *self.rid.lock()
    }
}

impl<T> Armed<T> {
    /// Wait for the completion callback. The single suspension point of
    /// every primitive.
    ///
    /// On timeout the in-flight operation is abandoned, not cancelled: the
    /// callback still fires eventually, finds the channel closed or the
    /// generation advanced, and drops its result.
    pub(crate) async fn wait(self, timeout: Duration) -> StoreResult<T> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(StoreError::Unavailable(
                "completion dropped without firing".to_string(),
            )),
            Err(_elapsed) => Err(StoreError::TimedOut),
        }
    }
}

/// Issue one AIO against the slot and await its completion.
///
/// `issue` hands the completion callback to the store; an `Err` from it
/// means the operation was never issued and the callback will not fire.
pub(crate) async fn drive<T, F>(slot: &Arc<AioSlot>, timeout: Duration, issue: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(AioComplete<T>) -> StoreResult<()>,
{
    let (armed, done) = slot.arm();
    issue(done)?;
    armed.wait(timeout).await
}

/// The process-lifetime slot storage plus the lease machinery that hands
/// each request exclusive use of one lane (slot index + per-mount pool
/// context index).
pub(crate) struct SlotTable {
    slots: Vec<Arc<AioSlot>>,
    free: Mutex<Vec<usize>>,
    capacity: Semaphore,
}

impl SlotTable {
    pub(crate) fn new(lanes: usize) -> Arc<SlotTable> {
        Arc::new(SlotTable {
            slots: (0..lanes).map(|_| Arc::new(AioSlot::new())).collect(),
            free: Mutex::new((0..lanes).rev().collect()),
            capacity: Semaphore::new(lanes),
        })
    }

    pub(crate) async fn lease(self: &Arc<Self>) -> SlotLease {
        // The semaphore is never closed.
        let permit = self.capacity.acquire().await.expect("slot semaphore closed");
        permit.forget();
        let id = self
            .free
            .lock()
            .pop()
            .expect("slot free list out of sync with semaphore");
        SlotLease {
            table: self.clone(),
            id,
        }
    }
}

/// Exclusive use of one lane until dropped. Streaming response bodies
/// capture the lease, extending it to the end of the stream.
pub(crate) struct SlotLease {
    table: Arc<SlotTable>,
    id: usize,
}

impl SlotLease {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn slot(&self) -> &Arc<AioSlot> {
        &self.table.slots[self.id]
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.table.free.lock().push(self.id);
        self.table.capacity.add_permits(1);
    }
}
