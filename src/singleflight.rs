use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

/// Coalesces concurrent loads of the same key into a single call.
///
/// The first caller for a key becomes the leader: it runs the supplied
/// future, publishes the result, and removes the in-flight record. Every
/// caller that arrives while the record is present waits on the leader's
/// completion signal and receives a clone of the same result, success or
/// failure. Requests arriving after removal start a new generation.
///
/// There is no timeout or cancellation in here; callers layer those on
/// outside.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T: Clone> Flight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `load` for `key`, unless another caller is already doing so, in
    /// which case wait for and share that caller's result.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut load = Some(load);
        loop {
            let role = {
                let mut calls = self.calls.lock().expect("singleflight lock poisoned");
                match calls.get(key) {
                    Some(receiver) => Role::Waiter(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        calls.insert(key.to_owned(), receiver);
                        Role::Leader(sender)
                    }
                }
            };
            match role {
                Role::Leader(sender) => {
                    let load = load.take().expect("leadership is won at most once");
                    let result = load().await;
                    // Publish before dropping the map entry: waiters that
                    // already hold the receiver still observe the result.
                    let _ = sender.send(Some(result.clone()));
                    self.calls
                        .lock()
                        .expect("singleflight lock poisoned")
                        .remove(key);
                    return result;
                }
                Role::Waiter(mut receiver) => {
                    match receiver.wait_for(|slot| slot.is_some()).await {
                        Ok(slot) => return slot.as_ref().cloned().expect("slot checked above"),
                        // The leader went away without publishing; contend
                        // for leadership again.
                        Err(_) => continue,
                    }
                }
            }
        }
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}
