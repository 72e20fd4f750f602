//! Topic based publish/subscribe with bounded per-subscriber channels.
//!
//! A publish never blocks: each subscriber gets a non-blocking send, and
//! whatever does not fit is parked in that subscriber's pending queue. A
//! per-topic drain worker retries parked messages with a growing back-off
//! until the queues are empty. A message only goes to the channel once
//! everything parked before it has gone, so per-subscriber order matches
//! publish order.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Sender, TrySendError};
use rustc_hash::FxHashMap;

use crate::{
    sync,
    value::{types::Type, Value},
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("provider closed")]
    Closed,
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("event '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("event '{event}' expects {expected} arguments, got {got}")]
    ArgumentCount {
        event: String,
        expected: usize,
        got: usize,
    },
    #[error("event '{event}' argument {index} ({name}) expected type {expected}, got {got}")]
    ArgumentType {
        event: String,
        index: usize,
        name: String,
        expected: String,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// `<interpreter-id>_<name>`
    pub id: String,
    pub args: Vec<(String, Type)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOptions {
    /// Upper bound on drain workers alive at once.
    pub max_workers_per_topic: usize,
    /// Capacity of each subscriber channel.
    pub channel_buffer_size: usize,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            max_workers_per_topic: 10,
            channel_buffer_size: 1024,
        }
    }
}

pub type Handler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

struct Subscriber {
    id: u64,
    sender: Sender<Vec<Value>>,
    pending: VecDeque<Vec<Value>>,
}

impl Subscriber {
    /// Moves parked messages into the channel until it fills up.
    fn drain(&mut self, in_flight: &AtomicUsize) -> bool {
        let mut progressed = false;
        while let Some(message) = self.pending.pop_front() {
            match self.sender.try_send(message) {
                Ok(()) => progressed = true,
                Err(TrySendError::Full(message)) => {
                    self.pending.push_front(message);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    in_flight.fetch_sub(self.pending.len() + 1, Ordering::AcqRel);
                    self.pending.clear();
                    break;
                }
            }
        }
        progressed
    }
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
    /// Messages published while nobody listened; handed to the first subscriber.
    /// Holds at most `channel_buffer_size` entries, past that the oldest is
    /// dropped with an `events.publish.dropped` warning.
    orphaned: VecDeque<Vec<Value>>,
    draining: bool,
}

impl Topic {
    fn has_pending(&self) -> bool {
        self.subscribers.iter().any(|s| !s.pending.is_empty())
    }
}

#[derive(Default)]
struct State {
    events: FxHashMap<String, Event>,
    topics: FxHashMap<String, Topic>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub published: u64,
    pub buffered: u64,
    pub delivered: u64,
}

struct Inner {
    options: EventOptions,
    state: RwLock<State>,
    closed: AtomicBool,
    workers: AtomicUsize,
    next_subscriber: AtomicU64,
    /// Messages accepted but whose handler has not finished yet.
    in_flight: AtomicUsize,
    published: AtomicU64,
    buffered: AtomicU64,
    delivered: AtomicU64,
}

#[derive(Clone)]
pub struct EventProvider {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProvider")
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl EventProvider {
    pub fn new(options: EventOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: RwLock::new(State::default()),
                closed: AtomicBool::new(false),
                workers: AtomicUsize::new(0),
                next_subscriber: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                published: AtomicU64::new(0),
                buffered: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    pub fn add_event(&self, event: Event) -> Result<(), EventError> {
        let mut state = sync::write(&self.inner.state);
        if state.events.contains_key(&event.id) {
            return Err(EventError::AlreadyRegistered(event.id));
        }
        tracing::debug!(topic = %event.id, "events.register");
        state.events.insert(event.id.clone(), event);
        Ok(())
    }

    pub fn event(&self, id: &str) -> Option<Event> {
        sync::read(&self.inner.state).events.get(id).cloned()
    }

    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = sync::read(&self.inner.state)
            .events
            .values()
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            published: self.inner.published.load(Ordering::Relaxed),
            buffered: self.inner.buffered.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
        }
    }

    pub fn publish(&self, topic: &str, data: Vec<Value>) -> Result<(), EventError> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }

        let mut state = sync::write(&self.inner.state);
        let event = state
            .events
            .get(topic)
            .ok_or_else(|| EventError::UnknownEvent(topic.to_string()))?;
        check_arguments(event, &data)?;

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        if topic_state.subscribers.is_empty() {
            topic_state.orphaned.push_back(data);
            if topic_state.orphaned.len() > self.inner.options.channel_buffer_size {
                topic_state.orphaned.pop_front();
                tracing::warn!(topic, "events.publish.dropped");
            }
            return Ok(());
        }

        let mut parked = false;
        for subscriber in topic_state.subscribers.iter_mut() {
            self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
            if !subscriber.pending.is_empty() {
                subscriber.pending.push_back(data.clone());
                parked = true;
                continue;
            }
            match subscriber.sender.try_send(data.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    subscriber.pending.push_back(message);
                    parked = true;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        if parked {
            self.inner.buffered.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(topic, "events.publish.buffered");
            if !topic_state.draining && self.reserve_worker() {
                topic_state.draining = true;
                self.spawn_worker(topic.to_string());
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, topic: &str, handler: Handler) -> Result<Subscription, EventError> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }

        let mut state = sync::write(&self.inner.state);
        if !state.events.contains_key(topic) {
            return Err(EventError::UnknownEvent(topic.to_string()));
        }

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = bounded::<Vec<Value>>(self.inner.options.channel_buffer_size.max(1));
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        let orphaned: VecDeque<Vec<Value>> = std::mem::take(&mut topic_state.orphaned);
        self.inner
            .in_flight
            .fetch_add(orphaned.len(), Ordering::AcqRel);
        let mut subscriber = Subscriber {
            id,
            sender,
            pending: orphaned,
        };
        subscriber.drain(&self.inner.in_flight);
        let parked = !subscriber.pending.is_empty();
        topic_state.subscribers.push(subscriber);
        if parked && !topic_state.draining && self.reserve_worker() {
            topic_state.draining = true;
            self.spawn_worker(topic.to_string());
        }

        let inner = Arc::downgrade(&self.inner);
        let reader_topic = topic.to_string();
        thread::Builder::new()
            .name(format!("nubo-sub-{id}"))
            .spawn(move || {
                for message in receiver.iter() {
                    handler(message);
                    if let Some(inner) = inner.upgrade() {
                        inner.delivered.fetch_add(1, Ordering::Relaxed);
                        inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                    }
                }
                tracing::trace!(topic = %reader_topic, id, "events.subscriber.stopped");
            })
            .map_err(|_| EventError::Closed)?;

        tracing::debug!(topic, id, "events.subscribe");
        Ok(Subscription {
            provider: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
        })
    }

    /// Stops accepting publishes. Messages already in a channel are still
    /// handled; parked ones are dropped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = sync::write(&self.inner.state);
        for topic in state.topics.values_mut() {
            for subscriber in topic.subscribers.drain(..) {
                self.inner
                    .in_flight
                    .fetch_sub(subscriber.pending.len(), Ordering::AcqRel);
            }
            topic.orphaned.clear();
        }
        tracing::debug!("events.close");
    }

    /// Blocks until every accepted message has been handled, or `timeout`
    /// passes. Returns whether the bus went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while self.inner.in_flight.load(Ordering::Acquire) > 0 {
            if started.elapsed() >= timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn reserve_worker(&self) -> bool {
        let cap = self.inner.options.max_workers_per_topic;
        self.inner
            .workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < cap).then_some(n + 1)
            })
            .is_ok()
    }

    fn spawn_worker(&self, topic: String) {
        let inner = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("nubo-drain-{topic}"))
            .spawn(move || drain_worker(inner, topic));
        if spawned.is_err() {
            self.inner.workers.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Drains one topic, then adopts any other topic left without a worker
/// because the cap was reached.
fn drain_worker(inner: Weak<Inner>, mut topic: String) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let Some(provider) = inner.upgrade() else {
            return;
        };
        if provider.closed.load(Ordering::Acquire) {
            provider.workers.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let progressed = {
            let mut state = sync::write(&provider.state);
            let mut progressed = false;
            let mut done = true;
            if let Some(current) = state.topics.get_mut(&topic) {
                for subscriber in current.subscribers.iter_mut() {
                    progressed |= subscriber.drain(&provider.in_flight);
                }
                done = !current.has_pending();
                if done {
                    current.draining = false;
                }
            }

            if done {
                let next = state
                    .topics
                    .iter_mut()
                    .find(|(_, t)| !t.draining && t.has_pending());
                match next {
                    Some((name, next)) => {
                        next.draining = true;
                        topic = name.clone();
                        backoff = INITIAL_BACKOFF;
                        continue;
                    }
                    None => {
                        provider.workers.fetch_sub(1, Ordering::AcqRel);
                        tracing::trace!(topic = %topic, "events.worker.exit");
                        return;
                    }
                }
            }
            progressed
        };

        drop(provider);
        if progressed {
            backoff = INITIAL_BACKOFF;
            thread::yield_now();
        } else {
            thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

fn check_arguments(event: &Event, data: &[Value]) -> Result<(), EventError> {
    if data.len() != event.args.len() {
        return Err(EventError::ArgumentCount {
            event: event.id.clone(),
            expected: event.args.len(),
            got: data.len(),
        });
    }
    for (index, ((name, expected), value)) in event.args.iter().zip(data).enumerate() {
        let got = value.type_of();
        if !expected.compare(&got) {
            return Err(EventError::ArgumentType {
                event: event.id.clone(),
                index: index + 1,
                name: name.clone(),
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
    }
    Ok(())
}

/// Handle returned by `subscribe`; dropping it does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    provider: Weak<Inner>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the subscriber. Its reader finishes what is already in the
    /// channel and exits.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.provider.upgrade() else {
            return false;
        };
        let mut state = sync::write(&inner.state);
        let Some(topic) = state.topics.get_mut(&self.topic) else {
            return false;
        };
        let Some(position) = topic.subscribers.iter().position(|s| s.id == self.id) else {
            return false;
        };
        let subscriber = topic.subscribers.remove(position);
        inner
            .in_flight
            .fetch_sub(subscriber.pending.len(), Ordering::AcqRel);
        tracing::debug!(topic = %self.topic, id = self.id, "events.unsubscribe");
        true
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    fn provider(buffer: usize) -> EventProvider {
        let provider = EventProvider::new(EventOptions {
            max_workers_per_topic: 10,
            channel_buffer_size: buffer,
        });
        provider
            .add_event(Event {
                id: "1_tick".into(),
                args: vec![("n".into(), Type::INT)],
            })
            .unwrap();
        provider
    }

    fn recorder() -> (Arc<Mutex<Vec<i64>>>, Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Arc::new(move |data: Vec<Value>| {
            if let Some(Value::Int(n)) = data.first() {
                thread::sleep(Duration::from_micros(200));
                sink.lock().unwrap().push(*n);
            }
        });
        (seen, handler)
    }

    #[test]
    fn test_every_subscriber_sees_every_message_in_order() {
        let provider = provider(2);
        let (first, handler) = recorder();
        provider.subscribe("1_tick", handler).unwrap();
        let (second, handler) = recorder();
        provider.subscribe("1_tick", handler).unwrap();

        for n in 0..200 {
            provider.publish("1_tick", vec![Value::Int(n)]).unwrap();
        }
        assert!(provider.wait_idle(Duration::from_secs(10)));

        let expected: Vec<i64> = (0..200).collect();
        assert_eq!(*first.lock().unwrap(), expected);
        assert_eq!(*second.lock().unwrap(), expected);
        assert!(provider.stats().buffered > 0);
    }

    #[test]
    fn test_messages_published_before_subscribing_are_kept() {
        let provider = provider(8);
        provider.publish("1_tick", vec![Value::Int(1)]).unwrap();
        let (seen, handler) = recorder();
        provider.subscribe("1_tick", handler).unwrap();
        assert!(provider.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_unheard_messages_keep_only_the_newest() {
        let provider = provider(2);
        for n in 1..=3 {
            provider.publish("1_tick", vec![Value::Int(n)]).unwrap();
        }
        let (seen, handler) = recorder();
        provider.subscribe("1_tick", handler).unwrap();
        assert!(provider.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_argument_checks() {
        let provider = provider(8);
        assert_eq!(
            provider.publish("1_tick", vec![]),
            Err(EventError::ArgumentCount {
                event: "1_tick".into(),
                expected: 1,
                got: 0
            })
        );
        assert!(matches!(
            provider.publish("1_tick", vec![Value::string("x")]),
            Err(EventError::ArgumentType { index: 1, .. })
        ));
        assert_eq!(
            provider.publish("1_missing", vec![]),
            Err(EventError::UnknownEvent("1_missing".into()))
        );
    }

    #[test]
    fn test_close() {
        let provider = provider(8);
        let (seen, handler) = recorder();
        provider.subscribe("1_tick", handler).unwrap();
        provider.publish("1_tick", vec![Value::Int(1)]).unwrap();
        provider.close();
        assert_eq!(
            provider.publish("1_tick", vec![Value::Int(2)]).unwrap_err().to_string(),
            "provider closed"
        );
        assert!(provider.wait_idle(Duration::from_secs(5)));
        assert!(seen.lock().unwrap().len() <= 1);
    }

    #[test]
    fn test_unsubscribe() {
        let provider = provider(8);
        let (seen, handler) = recorder();
        let subscription = provider.subscribe("1_tick", handler).unwrap();
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        provider.publish("1_tick", vec![Value::Int(1)]).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().unwrap().is_empty());
    }
}
