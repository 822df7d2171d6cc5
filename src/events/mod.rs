//! Typed event streams published by connections and players.
//!
//! Each source owns an [`EventSink`]; any number of listeners may subscribe,
//! and every listener sees every event, in order.

mod connection;
mod player;

pub use self::{connection::*, player::*};

use flume::{Receiver, Sender};
use parking_lot::Mutex;

/// Fan-out point for one kind of event.
///
/// Listeners whose receivers have been dropped are pruned on the next emission.
#[derive(Debug)]
pub struct EventSink<T> {
    listeners: Mutex<Vec<Sender<T>>>,
}

impl<T> Default for EventSink<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventSink<T> {
    /// Registers a new listener, which will observe all future events.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    /// Sends `event` to every live listener.
    pub fn emit(&self, event: T) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of listeners as of the last emission.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
