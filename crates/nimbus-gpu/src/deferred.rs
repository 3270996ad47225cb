//! Single-shot deferred results.
//!
//! Both async pipeline creation and `Queue::on_submitted_work_done` hand the
//! caller a [`Deferred`]: it resolves or rejects exactly once and never
//! replays. There is no cancellation; dropping the `Deferred` simply abandons
//! the result. The resolver half is consumed by `resolve`/`reject`, which
//! makes double resolution unrepresentable.
//!
//! State sits behind `Arc<Mutex>` only because native completion callbacks
//! can fire from a driver thread; the kernel itself is single-threaded.

use std::sync::{Arc, Mutex};

use crate::error::GfxError;

enum State<T> {
    Pending,
    Ready(Result<T, GfxError>),
}

/// Consumer half: poll for the settled value.
pub struct Deferred<T> {
    state: Arc<Mutex<State<T>>>,
}

/// Resolver half: settle the result exactly once.
pub struct DeferredHandle<T> {
    state: Arc<Mutex<State<T>>>,
}

pub fn channel<T>() -> (DeferredHandle<T>, Deferred<T>) {
    let state = Arc::new(Mutex::new(State::Pending));
    (
        DeferredHandle {
            state: Arc::clone(&state),
        },
        Deferred { state },
    )
}

impl<T> DeferredHandle<T> {
    pub fn resolve(self, value: T) {
        let mut state = self.state.lock().expect("deferred state poisoned");
        if matches!(*state, State::Pending) {
            *state = State::Ready(Ok(value));
        }
    }

    pub fn reject(self, error: GfxError) {
        let mut state = self.state.lock().expect("deferred state poisoned");
        if matches!(*state, State::Pending) {
            *state = State::Ready(Err(error));
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns `None` while pending, otherwise the settled result.
    pub fn ready(&self) -> Option<Result<T, GfxError>> {
        let state = self.state.lock().expect("deferred state poisoned");
        match &*state {
            State::Pending => None,
            State::Ready(result) => Some(result.clone()),
        }
    }
}

impl<T> Deferred<T> {
    pub fn is_pending(&self) -> bool {
        matches!(
            *self.state.lock().expect("deferred state poisoned"),
            State::Pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pending() {
        let (_handle, deferred) = channel::<u32>();
        assert!(deferred.is_pending());
        assert!(deferred.ready().is_none());
    }

    #[test]
    fn resolve_settles_once() {
        let (handle, deferred) = channel();
        handle.resolve(7u32);
        assert!(!deferred.is_pending());
        assert_eq!(deferred.ready(), Some(Ok(7)));
        // Reading again replays the settled value, not a new one.
        assert_eq!(deferred.ready(), Some(Ok(7)));
    }

    #[test]
    fn reject_settles_with_the_error() {
        let (handle, deferred) = channel::<()>();
        handle.reject(GfxError::Compilation("bad entry point".into()));
        assert_eq!(
            deferred.ready(),
            Some(Err(GfxError::Compilation("bad entry point".into())))
        );
    }

    #[test]
    fn dropping_the_handle_leaves_the_result_pending() {
        let (handle, deferred) = channel::<u32>();
        drop(handle);
        assert!(deferred.is_pending());
    }
}
