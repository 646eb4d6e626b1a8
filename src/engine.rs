//! A background task that collects fired events, batches them, and uploads them to the collector.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::event::Timestamp;
use crate::producer::{ContextChange, EventProducer};
use crate::uploader::{EventUploader, HttpTransport, UploadOutcome};
use crate::value::Struct;
use crate::{ConfidenceValue, Error, Event, EventBatch, EventsConfig, Result};

const EVENT_DEFINITION_PREFIX: &str = "eventDefinitions/";

enum Command {
    Emit {
        definition: String,
        event_time: Timestamp,
        payload: HashMap<String, ConfidenceValue>,
    },
    PutContext(ContextChange),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Collects events from the application and from [`EventProducer`]s and uploads them in batches.
///
/// Every event gets a snapshot of the ambient context as of the moment it fired. Events are kept
/// in memory until the collector accepts them (or rejects them for good). A batch is flushed when
/// the queue reaches the configured batch size, on every flush interval, on
/// [`flush`](EventSenderEngine::flush), and once more on
/// [`shutdown`](EventSenderEngine::shutdown).
///
/// All state lives in a single tokio task, so the engine itself can be shared freely.
pub struct EventSenderEngine {
    runtime: Handle,
    commands: mpsc::UnboundedSender<Command>,
    producers: Mutex<Vec<Arc<dyn EventProducer>>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    join_handle: JoinHandle<()>,
}

impl EventSenderEngine {
    /// Start the engine on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRuntime`] if called outside of a tokio runtime.
    pub fn start<T>(config: EventsConfig, uploader: EventUploader<T>) -> Result<EventSenderEngine>
    where
        T: HttpTransport + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| Error::MissingRuntime)?;

        let (commands, receiver) = mpsc::unbounded_channel();

        let flush_interval = config.flush_interval;
        let max_queue_size = config.effective_max_queue_size();
        let state = EngineState {
            client_secret: config.client_secret,
            batch_size: config.batch_size,
            max_queue_size,
            uploader,
            context: Struct::new(),
            queue: VecDeque::new(),
            retry_pending: false,
        };
        let join_handle = runtime.spawn(state.run(receiver, flush_interval));

        Ok(EventSenderEngine {
            runtime,
            commands,
            producers: Mutex::new(Vec::new()),
            forwarders: Mutex::new(Vec::new()),
            join_handle,
        })
    }

    /// Fire an event named `definition` (without the `eventDefinitions/` prefix).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEventDefinition`] if `definition` is empty.
    /// - [`Error::EngineStopped`] if the engine is no longer running.
    pub fn emit(&self, definition: &str, payload: HashMap<String, ConfidenceValue>) -> Result<()> {
        if definition.is_empty() {
            return Err(Error::InvalidEventDefinition);
        }
        self.send(Command::Emit {
            definition: definition.to_owned(),
            event_time: Utc::now(),
            payload,
        })
    }

    /// Merge `context` into the ambient context attached to events fired from now on.
    pub fn put_context(&self, context: ContextChange) -> Result<()> {
        self.send(Command::PutContext(context))
    }

    /// Consume events and context changes from `producer` until it stops.
    ///
    /// A context change the producer published before an event is applied before that event is
    /// queued. Changes published after an event may or may not be included in its snapshot.
    ///
    /// The producer is stopped when the engine shuts down.
    pub fn add_producer(&self, producer: Arc<dyn EventProducer>) -> Result<()> {
        if self.commands.is_closed() {
            return Err(Error::EngineStopped);
        }

        let mut events = producer.events().fuse();
        let mut changes = producer.context_changes().fuse();
        let commands = self.commands.clone();
        let forwarder = self.runtime.spawn(async move {
            loop {
                // Pending context changes go first, so an event always carries every change the
                // producer published before it.
                let command = tokio::select! {
                    biased;
                    Some(change) = changes.next() => Command::PutContext(change),
                    Some(event) = events.next() => {
                        if event.name.is_empty() {
                            log::warn!(target: "confidence", "ignoring produced event with empty name");
                            continue;
                        }
                        Command::Emit {
                            definition: event.name,
                            event_time: Utc::now(),
                            payload: event.message,
                        }
                    }
                    else => break,
                };
                if commands.send(command).is_err() {
                    break;
                }
            }
        });

        self.forwarders
            .lock()
            .expect("thread holding engine lock should not panic")
            .push(forwarder);
        self.producers
            .lock()
            .expect("thread holding engine lock should not panic")
            .push(producer);

        Ok(())
    }

    /// Upload everything queued so far and wait for the attempt to finish.
    ///
    /// Events the collector asked to retry stay queued; this is not an error.
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.send(Command::Flush(done))?;
        wait.await.map_err(|_| Error::EngineStopped)
    }

    /// Stop all producers, flush queued events one last time, and wait for the engine task to
    /// exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine task has panicked.
    pub async fn shutdown(self) -> Result<()> {
        let producers = self
            .producers
            .into_inner()
            .expect("thread holding engine lock should not panic");
        for producer in producers {
            producer.stop();
        }

        let forwarders = self
            .forwarders
            .into_inner()
            .expect("thread holding engine lock should not panic");
        for forwarder in forwarders {
            forwarder.abort();
        }

        // Error means the task has already exited.
        let _ = self.commands.send(Command::Shutdown);

        self.join_handle.await.map_err(|_| Error::EngineStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::EngineStopped)
    }
}

struct EngineState<T> {
    client_secret: String,
    batch_size: usize,
    max_queue_size: usize,
    uploader: EventUploader<T>,
    context: Struct,
    queue: VecDeque<Event>,
    /// Set when the last upload asked to retry. Size-triggered flushes are skipped until the next
    /// periodic or explicit flush, so an unavailable collector is not hit on every event.
    retry_pending: bool,
}

impl<T: HttpTransport> EngineState<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        flush_interval: Duration,
    ) {
        log::debug!(target: "confidence", batch_size = self.batch_size; "event sender engine started");

        let mut ticker = (!flush_interval.is_zero()).then(|| {
            let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Emit { definition, event_time, payload }) => {
                        self.enqueue(&definition, event_time, payload);
                        if self.queue.len() >= self.batch_size && !self.retry_pending {
                            self.flush().await;
                        }
                    }
                    Some(Command::PutContext(context)) => self.context.extend(context),
                    Some(Command::Flush(done)) => {
                        self.flush().await;
                        // Error means the caller stopped waiting.
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown) | None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => self.flush().await,
            }
        }

        if !self.queue.is_empty() {
            log::warn!(target: "confidence", dropped = self.queue.len(); "event sender engine stopped with undelivered events");
        }
        log::debug!(target: "confidence", "event sender engine stopped");
    }

    fn enqueue(
        &mut self,
        definition: &str,
        event_time: Timestamp,
        payload: HashMap<String, ConfidenceValue>,
    ) {
        let event = match Event::new(
            format!("{EVENT_DEFINITION_PREFIX}{definition}"),
            event_time,
            payload,
            ConfidenceValue::Struct(self.context.clone()),
        ) {
            Ok(event) => event,
            Err(err) => {
                log::warn!(target: "confidence", "ignoring invalid event: {:?}", err);
                return;
            }
        };

        while self.queue.len() >= self.max_queue_size {
            let Some(dropped) = self.queue.pop_front() else {
                break;
            };
            log::warn!(target: "confidence", event_definition = dropped.event_definition(); "dropped event due to queue overflow");
        }

        self.queue.push_back(event);
    }

    /// Upload queued events in batches of at most `batch_size`, stopping at the first batch the
    /// collector asks to retry.
    async fn flush(&mut self) {
        while !self.queue.is_empty() {
            let count = self.queue.len().min(self.batch_size);
            let events: Vec<Event> = self.queue.drain(..count).collect();
            let batch = EventBatch::new(self.client_secret.clone(), events);

            match self.uploader.upload(&batch).await {
                UploadOutcome::Delivered => {}
                UploadOutcome::Retry => {
                    // Put the events back in front, keeping fire order.
                    for event in batch.into_events().into_iter().rev() {
                        self.queue.push_front(event);
                    }
                    self.retry_pending = true;
                    return;
                }
            }
        }
        self.retry_pending = false;
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::EventSenderEngine;
    use crate::test_support::{StubResponse, StubTransport};
    use crate::{
        ChannelEventProducer, ConfidenceValue, Error, EventBatch, EventUploader, EventsConfig,
    };

    fn config() -> EventsConfig {
        EventsConfig::from_client_secret("secret").flush_interval(Duration::ZERO)
    }

    fn start(config: EventsConfig, transport: &Arc<StubTransport>) -> EventSenderEngine {
        let uploader = EventUploader::new("https://events.test", transport.clone()).unwrap();
        EventSenderEngine::start(config, uploader).unwrap()
    }

    fn definitions(batch: &EventBatch) -> Vec<String> {
        batch
            .events()
            .iter()
            .map(|event| event.event_definition().to_owned())
            .collect()
    }

    fn context(entries: &[(&str, ConfidenceValue)]) -> HashMap<String, ConfidenceValue> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    async fn wait_for(transport: &StubTransport, batches: usize) {
        for _ in 0..100 {
            if transport.batches().len() >= batches {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {batches} batches");
    }

    #[tokio::test]
    async fn snapshots_context_at_fire_time() {
        let _ = env_logger::builder().is_test(true).try_init();

        let transport = Arc::new(StubTransport::always(200));
        let engine = start(config(), &transport);

        engine
            .put_context(context(&[("visitor", ConfidenceValue::from("v1"))]))
            .unwrap();
        engine.emit("first", HashMap::new()).unwrap();
        engine
            .put_context(context(&[("visitor", ConfidenceValue::from("v2"))]))
            .unwrap();
        engine.emit("second", HashMap::new()).unwrap();
        engine.flush().await.unwrap();

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        let events = batches[0].events();
        assert_eq!(
            definitions(&batches[0]),
            ["eventDefinitions/first", "eventDefinitions/second"]
        );
        assert_eq!(
            events[0].context(),
            &ConfidenceValue::Struct(context(&[("visitor", ConfidenceValue::from("v1"))]))
        );
        assert_eq!(
            events[1].context(),
            &ConfidenceValue::Struct(context(&[("visitor", ConfidenceValue::from("v2"))]))
        );
        assert_eq!(batches[0].client_secret(), "secret");

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retries_retained_events_in_order() {
        let transport = Arc::new(StubTransport::scripted(
            [StubResponse::Status(503), StubResponse::NetworkFailure],
            StubResponse::Status(200),
        ));
        let engine = start(config(), &transport);

        for name in ["a", "b", "c"] {
            engine.emit(name, HashMap::new()).unwrap();
        }
        engine.flush().await.unwrap();
        engine.flush().await.unwrap();
        engine.flush().await.unwrap();
        // Nothing left to send.
        engine.flush().await.unwrap();

        let batches = transport.batches();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(
                definitions(batch),
                [
                    "eventDefinitions/a",
                    "eventDefinitions/b",
                    "eventDefinitions/c"
                ]
            );
        }
        assert_eq!(batches[0].events(), batches[2].events());

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_batch_is_dropped() {
        let transport = Arc::new(StubTransport::always(403));
        let engine = start(config(), &transport);

        engine.emit("a", HashMap::new()).unwrap();
        engine.flush().await.unwrap();
        engine.flush().await.unwrap();

        assert_eq!(transport.batches().len(), 1);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn splits_queue_into_batches() {
        let transport = Arc::new(StubTransport::always(200));
        let engine = start(config().batch_size(2), &transport);

        for name in ["a", "b", "c", "d", "e"] {
            engine.emit(name, HashMap::new()).unwrap();
        }
        engine.flush().await.unwrap();

        let sizes: Vec<_> = transport.batches().iter().map(EventBatch::len).collect();
        assert_eq!(sizes, [2, 2, 1]);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn overflow_drops_oldest_events() {
        let transport = Arc::new(StubTransport::scripted(
            [StubResponse::Status(500)],
            StubResponse::Status(200),
        ));
        let engine = start(config().batch_size(3).max_queue_size(3), &transport);

        for name in ["a", "b", "c", "d", "e"] {
            engine.emit(name, HashMap::new()).unwrap();
        }
        engine.flush().await.unwrap();

        let batches = transport.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            definitions(&batches[0]),
            [
                "eventDefinitions/a",
                "eventDefinitions/b",
                "eventDefinitions/c"
            ]
        );
        assert_eq!(
            definitions(&batches[1]),
            [
                "eventDefinitions/c",
                "eventDefinitions/d",
                "eventDefinitions/e"
            ]
        );

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn flushes_periodically() {
        let transport = Arc::new(StubTransport::always(200));
        let engine = start(
            config().flush_interval(Duration::from_millis(20)),
            &transport,
        );

        engine.emit("tick", HashMap::new()).unwrap();
        wait_for(&transport, 1).await;

        assert_eq!(
            definitions(&transport.batches()[0]),
            ["eventDefinitions/tick"]
        );

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_events() {
        let transport = Arc::new(StubTransport::always(200));
        let engine = start(config(), &transport);

        engine.emit("last", HashMap::new()).unwrap();
        engine.shutdown().await.unwrap();

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(definitions(&batches[0]), ["eventDefinitions/last"]);
    }

    #[tokio::test]
    async fn consumes_producer_until_shutdown() {
        let transport = Arc::new(StubTransport::always(200));
        let engine = start(config(), &transport);
        let producer = Arc::new(ChannelEventProducer::new());
        engine.add_producer(producer.clone()).unwrap();

        producer
            .put_context(context(&[("screen", ConfidenceValue::from("home"))]))
            .unwrap();
        producer
            .emit(
                "navigate",
                context(&[("target", ConfidenceValue::from("profile"))]),
            )
            .unwrap();

        for _ in 0..100 {
            engine.flush().await.unwrap();
            if !transport.batches().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let batches = transport.batches();
        let event = &batches[0].events()[0];
        assert_eq!(event.event_definition(), "eventDefinitions/navigate");
        assert_eq!(event.payload()["target"].as_str(), Some("profile"));
        assert_eq!(
            event.context(),
            &ConfidenceValue::Struct(context(&[("screen", ConfidenceValue::from("home"))]))
        );

        engine.shutdown().await.unwrap();
        assert!(producer.is_stopped());
        assert!(matches!(
            producer.emit("late", HashMap::new()),
            Err(Error::ProducerStopped)
        ));
    }

    #[tokio::test]
    async fn rejects_empty_definition() {
        let transport = Arc::new(StubTransport::always(200));
        let engine = start(config(), &transport);

        assert!(matches!(
            engine.emit("", HashMap::new()),
            Err(Error::InvalidEventDefinition)
        ));

        engine.shutdown().await.unwrap();
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn start_requires_runtime() {
        let transport = Arc::new(StubTransport::always(200));
        let uploader = EventUploader::new("https://events.test", transport).unwrap();

        let result = EventSenderEngine::start(config(), uploader);

        assert!(matches!(result, Err(Error::MissingRuntime)));
    }
}
