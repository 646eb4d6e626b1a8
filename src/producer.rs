//! Sources of fired events and context changes.
//!
//! An [`EventProducer`] is plugged into an [`EventSenderEngine`](crate::EventSenderEngine) with
//! [`add_producer`](crate::EventSenderEngine::add_producer). The engine consumes both streams until
//! they end and calls [`EventProducer::stop`] on shutdown.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::{ConfidenceValue, Error, Result};

/// Event emitted by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedEvent {
    /// Event definition name, without the `eventDefinitions/` prefix.
    pub name: String,
    /// Event payload.
    pub message: HashMap<String, ConfidenceValue>,
}

/// Context entries to merge into the ambient context.
pub type ContextChange = HashMap<String, ConfidenceValue>;

/// A source of fired events and context changes.
///
/// Both streams are lazy, unbounded, and can only be consumed once. After [`stop`] returns,
/// neither stream yields another element and both end.
///
/// [`stop`]: EventProducer::stop
pub trait EventProducer: Send + Sync {
    /// Stream of fired events.
    fn events(&self) -> BoxStream<'static, ProducedEvent>;

    /// Stream of context changes.
    fn context_changes(&self) -> BoxStream<'static, ContextChange>;

    /// Terminate both streams.
    fn stop(&self);
}

/// An [`EventProducer`] fed from application code.
///
/// # Examples
/// ```
/// # use confidence_events::{ChannelEventProducer, ConfidenceValue, EventProducer};
/// let producer = ChannelEventProducer::new();
/// producer.emit("navigate", [("target".to_owned(), ConfidenceValue::from("home"))].into()).unwrap();
/// producer.stop();
/// assert!(producer.emit("navigate", Default::default()).is_err());
/// ```
pub struct ChannelEventProducer {
    events: Channel<ProducedEvent>,
    context_changes: Channel<ContextChange>,
    stopped: Arc<AtomicBool>,
}

struct Channel<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

impl<T: Send + 'static> Channel<T> {
    fn new() -> Channel<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Channel {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    fn send(&self, value: T) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .expect("thread holding producer lock should not panic");
        match &*sender {
            Some(sender) => sender.send(value).map_err(|_| Error::ProducerStopped),
            None => Err(Error::ProducerStopped),
        }
    }

    fn close(&self) {
        // Dropping the sender wakes up a pending receiver.
        self.sender
            .lock()
            .expect("thread holding producer lock should not panic")
            .take();
    }

    fn stream(&self, stopped: Arc<AtomicBool>) -> BoxStream<'static, T> {
        let receiver = self
            .receiver
            .lock()
            .expect("thread holding producer lock should not panic")
            .take();

        let Some(receiver) = receiver else {
            return stream::empty().boxed();
        };

        stream::unfold(receiver, move |mut receiver| {
            let stopped = stopped.clone();
            async move {
                let Some(value) = receiver.recv().await else {
                    return None;
                };
                // Drop anything still buffered once stopped.
                if stopped.load(Ordering::SeqCst) {
                    return None;
                }
                Some((value, receiver))
            }
        })
        .boxed()
    }
}

impl ChannelEventProducer {
    /// Create a new producer.
    pub fn new() -> ChannelEventProducer {
        ChannelEventProducer {
            events: Channel::new(),
            context_changes: Channel::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire an event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerStopped`] after [`EventProducer::stop`].
    pub fn emit(
        &self,
        name: impl Into<String>,
        message: HashMap<String, ConfidenceValue>,
    ) -> Result<()> {
        self.events.send(ProducedEvent {
            name: name.into(),
            message,
        })
    }

    /// Publish a context change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerStopped`] after [`EventProducer::stop`].
    pub fn put_context(&self, context: ContextChange) -> Result<()> {
        self.context_changes.send(context)
    }

    /// Returns `true` once [`EventProducer::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ChannelEventProducer {
    fn default() -> Self {
        ChannelEventProducer::new()
    }
}

impl EventProducer for ChannelEventProducer {
    fn events(&self) -> BoxStream<'static, ProducedEvent> {
        self.events.stream(self.stopped.clone())
    }

    fn context_changes(&self) -> BoxStream<'static, ContextChange> {
        self.context_changes.stream(self.stopped.clone())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.events.close();
        self.context_changes.close();
        log::debug!(target: "confidence", "event producer stopped");
    }
}
