//! Session events and observer registration.
//!
//! Observers are plain closures registered on an [`EventEmitter`]. Each
//! registration returns a [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the observer. Delivery is
//! synchronous and in registration order, from the task that emits.

use std::sync::{Arc, Mutex};

/// Speech from a room participant, transcribed by the realtime model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputTranscribed {
    pub transcript: String,
    /// Partial transcripts arrive first; one final transcript closes a turn.
    pub is_final: bool,
    pub speaker_id: Option<String>,
}

/// Error reported by the conversational session. Logged only; the session
/// keeps running unless the realtime connection itself closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub error: String,
    pub recoverable: bool,
}

type Handler<E> = Box<dyn FnMut(&E) + Send>;

struct Observers<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Fan-out point for one kind of session event.
pub struct EventEmitter<E> {
    inner: Arc<Mutex<Observers<E>>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Observers {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<E: 'static> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`. Handlers must not register or unregister
    /// observers on the same emitter from inside the callback.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = {
            let mut observers = self.lock();
            let id = observers.next_id;
            observers.next_id += 1;
            observers.handlers.push((id, Box::new(handler)));
            id
        };

        let inner = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    let mut observers = inner.lock().unwrap_or_else(|e| e.into_inner());
                    observers.handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        let mut observers = self.lock();
        for (_, handler) in observers.handlers.iter_mut() {
            handler(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().handlers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Observers<E>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle returned by [`EventEmitter::on`]. The observer stays registered
/// while the handle lives.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
