use tokio::task::JoinHandle;

/// Wraps a spawned task so it is aborted when the guard is dropped rather than left to
/// run to completion. Used to cancel the copier that is still running when its sibling
/// finishes or the call itself is dropped (client disconnect).
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        AbortOnDrop(handle)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
