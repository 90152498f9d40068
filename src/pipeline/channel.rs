use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;

/// Create a bounded channel with the specified buffer size
pub fn create_channel<T>(buffer_size: usize) -> (Sender<T>, Receiver<T>) {
    mpsc::channel(buffer_size.max(1))
}

/// Receiver shared by a pool of workers; every item goes to exactly one of them.
///
/// Closing does not need the receiver lock, so it can be requested while a
/// worker is parked in [`recv`](Self::recv).
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<Receiver<T>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> SharedReceiver<T> {
    pub fn new(receiver: Receiver<T>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(receiver)),
            closed: Arc::new(closed),
        }
    }

    /// Next item, or `None` once the channel is closed and empty
    pub async fn recv(&self) -> Option<T> {
        let mut closed = self.closed.subscribe();
        let mut rx = self.inner.lock().await;
        if !*closed.borrow_and_update() {
            tokio::select! {
                biased;
                item = rx.recv() => return item,
                _ = closed.wait_for(|c| *c) => {}
            }
        }
        rx.close();
        rx.recv().await
    }

    /// Stop accepting new items; already queued items are still delivered.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}
