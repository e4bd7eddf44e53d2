//! Frame receivers and the listener fan-out.

use std::sync::{Arc, Mutex, Weak};

use log::warn;

use super::Frame;

/// Callback for completely reassembled mesh frames.
///
/// Delivery happens synchronously on the frontend's update thread, so
/// implementations must return quickly; a listener that needs buffering
/// brings its own queue.
pub trait NetworkReceiver: Send + Sync {
    fn on_receive(&self, frame: &Frame);
}

/// Fans received frames out to every attached listener.
///
/// Listeners are held by weak reference; a listener whose owner has been
/// dropped is skipped during delivery and compacted out afterwards.
/// Registration is append-only, so delivery order is registration order.
#[derive(Default)]
pub struct Broadcaster {
    listeners: Mutex<Vec<Weak<dyn NetworkReceiver>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn attach_listener(&self, listener: &Arc<dyn NetworkReceiver>) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        listeners.push(Arc::downgrade(listener));
    }
}

impl NetworkReceiver for Broadcaster {
    fn on_receive(&self, frame: &Frame) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };

        let mut dropped = false;
        for weak in listeners.iter() {
            match weak.upgrade() {
                Some(listener) => listener.on_receive(frame),
                None => {
                    warn!("broadcaster: skipping released listener");
                    dropped = true;
                }
            }
        }

        if dropped {
            listeners.retain(|weak| weak.strong_count() > 0);
        }
    }
}
