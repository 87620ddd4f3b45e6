use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::Error;

/// One outstanding call: the receive loop completes `reply` with the raw
/// response body when a frame arrives on this handle, or never, if the
/// connection drops first (in which case `fail_all` drives it instead).
///
/// The completion carries undecoded bytes rather than a parsed `Response` so
/// XML decoding runs on the waiting caller's own task, not on the receive
/// loop that every other in-flight call and callback depends on.
pub struct PendingTable {
    inner: Mutex<HashMap<u32, oneshot::Sender<Result<Vec<u8>, Error>>>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handle as awaiting a reply. Returns `None` if `handle` is
    /// already registered, so the caller can draw a fresh handle and retry
    /// instead of clobbering an in-flight call.
    pub fn try_register(&self, handle: u32) -> Option<oneshot::Receiver<Result<Vec<u8>, Error>>> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.inner.lock().expect("pending table mutex poisoned");
        if guard.contains_key(&handle) {
            return None;
        }
        guard.insert(handle, tx);
        Some(rx)
    }

    /// Deregister a handle without completing it, for a caller that dropped
    /// its receiving end before a reply arrived. A no-op if the handle was
    /// already completed or never registered.
    pub fn cancel(&self, handle: u32) {
        self.inner
            .lock()
            .expect("pending table mutex poisoned")
            .remove(&handle);
    }

    /// Complete the call waiting on `handle`, if any. A handle with no
    /// matching registration is a stale or duplicate reply and is logged,
    /// not treated as an error: the connection stays healthy.
    pub fn complete(&self, handle: u32, body: Result<Vec<u8>, Error>) {
        let sender = self
            .inner
            .lock()
            .expect("pending table mutex poisoned")
            .remove(&handle);
        match sender {
            Some(tx) => {
                // The caller may have dropped its receiver (cancellation);
                // that is not this table's problem to report.
                let _ = tx.send(body);
            }
            None => {
                log::debug!("dropping response for unregistered handle {handle:#x}");
            }
        }
    }

    /// Fail every pending call with `reason`, e.g. because the connection
    /// just closed or was explicitly disconnected while calls were in
    /// flight. `reason` is a factory rather than a value since `Error` does
    /// not implement `Clone`.
    pub fn fail_all(&self, reason: impl Fn() -> Error) {
        let mut table = self.inner.lock().expect("pending table mutex poisoned");
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(reason()));
        }
    }

    #[cfg(test)]
    pub(crate) fn inner_len(&self) -> usize {
        self.inner.lock().expect("pending table mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_delivers_to_the_registered_receiver() {
        let table = PendingTable::new();
        let rx = table.try_register(0x8000_0001).unwrap();
        table.complete(0x8000_0001, Ok(b"<methodResponse/>".to_vec()));
        let body = rx.await.unwrap().unwrap();
        assert_eq!(body, b"<methodResponse/>");
    }

    #[tokio::test]
    async fn complete_on_unknown_handle_is_a_silent_no_op() {
        let table = PendingTable::new();
        table.complete(0x8000_0099, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn fail_all_drops_every_pending_receiver_with_the_given_reason() {
        let table = PendingTable::new();
        let rx1 = table.try_register(0x8000_0001).unwrap();
        let rx2 = table.try_register(0x8000_0002).unwrap();
        table.fail_all(|| Error::Closed);
        assert!(matches!(rx1.await.unwrap(), Err(Error::Closed)));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn cancel_removes_the_registration_without_completing_it() {
        let table = PendingTable::new();
        let rx = table.try_register(0x8000_0001).unwrap();
        table.cancel(0x8000_0001);
        drop(rx);
        // A second registration on the same handle must not be refused now
        // that the first was cancelled.
        assert!(table.try_register(0x8000_0001).is_some());
    }

    #[tokio::test]
    async fn registering_a_handle_twice_is_refused_instead_of_clobbering_the_first() {
        let table = PendingTable::new();
        let _rx = table.try_register(0x8000_0001).unwrap();
        assert!(table.try_register(0x8000_0001).is_none());
    }
}
