//! Pub/sub transport contract and the in-process loopback implementation.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

use serde_json::Value;

use crate::{
    error::{Error, Result},
    logging::Logger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    /// Declared wire schema, e.g. `visualization_msgs/Marker`.
    pub message_type: String,
    /// Minimum spacing between delivered messages, 0 for none.
    pub throttle_rate_ms: u32,
    pub queue_length: u32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: message_type.into(),
            throttle_rate_ms: 0,
            queue_length: 0,
        }
    }

    pub fn with_throttle_rate(mut self, throttle_rate_ms: u32) -> Self {
        self.throttle_rate_ms = throttle_rate_ms;
        self
    }

    pub fn with_queue_length(mut self, queue_length: u32) -> Self {
        self.queue_length = queue_length;
        self
    }
}

pub type MessageCallback = Box<dyn FnMut(&Value)>;
pub type ServiceSuccess = Box<dyn FnOnce(Value)>;
pub type ServiceFailure = Box<dyn FnOnce(Error)>;
pub type ServiceHandler = Box<dyn FnMut(&Value) -> Result<Value>>;

/// Topic subscription, publishing, and one-shot service calls.
///
/// Messages are delivered as parsed JSON values; consumers convert them to
/// their typed shape with [`crate::msgs::from_value`].
pub trait Transport {
    fn subscribe(&self, topic: &TopicSpec, callback: MessageCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
    fn publish(&self, topic: &str, message: Value);
    fn call_service(
        &self,
        service: &str,
        request: Value,
        on_success: ServiceSuccess,
        on_failure: ServiceFailure,
    );
}

struct TopicSubscriber {
    id: SubscriptionId,
    topic: TopicSpec,
    callback: Rc<RefCell<MessageCallback>>,
}

enum Pending {
    Message {
        topic: String,
        message: Value,
    },
    Call {
        service: String,
        request: Value,
        on_success: ServiceSuccess,
        on_failure: ServiceFailure,
    },
}

/// Single-threaded pub/sub used between the zenoh bridge and the scene, and
/// as the transport double in tests.
///
/// Nothing is delivered from inside `publish` or `call_service`: work is
/// queued and runs in order on [`LoopbackTransport::dispatch_pending`].
pub struct LoopbackTransport {
    log: Logger,
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<TopicSubscriber>>,
    services: RefCell<BTreeMap<String, Rc<RefCell<ServiceHandler>>>>,
    queue: RefCell<VecDeque<Pending>>,
    published: RefCell<Vec<(String, Value)>>,
}

impl LoopbackTransport {
    pub fn new(log: Logger) -> Rc<Self> {
        Rc::new(Self {
            log,
            next_id: Cell::new(1),
            subscribers: RefCell::new(Vec::new()),
            services: RefCell::new(BTreeMap::new()),
            queue: RefCell::new(VecDeque::new()),
            published: RefCell::new(Vec::new()),
        })
    }

    pub fn advertise_service(
        &self,
        service: &str,
        handler: impl FnMut(&Value) -> Result<Value> + 'static,
    ) {
        let handler: ServiceHandler = Box::new(handler);
        self.services
            .borrow_mut()
            .insert(service.to_owned(), Rc::new(RefCell::new(handler)));
    }

    /// Queues a message as if it arrived from the network.
    pub fn inject(&self, topic: &str, message: Value) {
        self.queue.borrow_mut().push_back(Pending::Message {
            topic: topic.to_owned(),
            message,
        });
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.borrow().clone()
    }

    pub fn take_published(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.published.borrow_mut())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.topic.name == topic)
            .count()
    }

    /// Distinct topics with at least one subscriber, in subscription order.
    pub fn topics(&self) -> Vec<TopicSpec> {
        let mut topics: Vec<TopicSpec> = Vec::new();
        for subscriber in self.subscribers.borrow().iter() {
            if !topics.iter().any(|t| t.name == subscriber.topic.name) {
                topics.push(subscriber.topic.clone());
            }
        }
        topics
    }

    /// Delivers queued messages and service calls, including any queued
    /// while dispatching. Returns how many items were processed.
    pub fn dispatch_pending(&self) -> usize {
        let mut processed = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(item) = next else {
                break;
            };
            processed += 1;
            match item {
                Pending::Message { topic, message } => self.deliver(&topic, &message),
                Pending::Call {
                    service,
                    request,
                    on_success,
                    on_failure,
                } => self.serve(&service, &request, on_success, on_failure),
            }
        }
        processed
    }

    fn deliver(&self, topic: &str, message: &Value) {
        let targets: Vec<(SubscriptionId, Rc<RefCell<MessageCallback>>)> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.topic.name == topic)
            .map(|s| (s.id, Rc::clone(&s.callback)))
            .collect();
        for (id, callback) in targets {
            let alive = self.subscribers.borrow().iter().any(|s| s.id == id);
            if !alive {
                continue;
            }
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (&mut *callback)(message);
            }
        }
    }

    fn serve(
        &self,
        service: &str,
        request: &Value,
        on_success: ServiceSuccess,
        on_failure: ServiceFailure,
    ) {
        let handler = self.services.borrow().get(service).cloned();
        let Some(handler) = handler else {
            self.log
                .warn(format_args!("service {service} is not advertised"));
            on_failure(Error::ServiceUnavailable(service.to_owned()));
            return;
        };
        let result = match handler.try_borrow_mut() {
            Ok(mut handler) => (&mut *handler)(request),
            Err(_) => Err(Error::Transport(format!("service {service} is busy"))),
        };
        match result {
            Ok(response) => on_success(response),
            Err(e) => on_failure(e),
        }
    }
}

impl Transport for LoopbackTransport {
    fn subscribe(&self, topic: &TopicSpec, callback: MessageCallback) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.log.debug(format_args!(
            "subscribing to {} ({})",
            topic.name, topic.message_type
        ));
        self.subscribers.borrow_mut().push(TopicSubscriber {
            id,
            topic: topic.clone(),
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|s| s.id != id);
    }

    fn publish(&self, topic: &str, message: Value) {
        self.published
            .borrow_mut()
            .push((topic.to_owned(), message.clone()));
        self.inject(topic, message);
    }

    fn call_service(
        &self,
        service: &str,
        request: Value,
        on_success: ServiceSuccess,
        on_failure: ServiceFailure,
    ) {
        self.queue.borrow_mut().push_back(Pending::Call {
            service: service.to_owned(),
            request,
            on_success,
            on_failure,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_are_delivered_on_dispatch_in_order() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        transport.subscribe(
            &TopicSpec::new("/chatter", "std_msgs/String"),
            Box::new(move |m| sink.borrow_mut().push(m["data"].as_i64().unwrap_or(-1))),
        );
        transport.publish("/chatter", json!({"data": 1}));
        transport.inject("/chatter", json!({"data": 2}));
        assert!(seen.borrow().is_empty());
        assert_eq!(transport.dispatch_pending(), 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(transport.published().len(), 1);
    }

    #[test]
    fn topics_are_listed_once() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        transport.subscribe(&TopicSpec::new("/scan", "sensor_msgs/LaserScan"), Box::new(|_| {}));
        transport.subscribe(&TopicSpec::new("/scan", "sensor_msgs/LaserScan"), Box::new(|_| {}));
        transport.subscribe(&TopicSpec::new("/map", "nav_msgs/OccupancyGrid"), Box::new(|_| {}));
        let names: Vec<String> = transport.topics().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["/scan", "/map"]);
        assert_eq!(transport.subscriber_count("/scan"), 2);
    }

    #[test]
    fn unsubscribed_callbacks_never_fire() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let id = transport.subscribe(
            &TopicSpec::new("/a", "x"),
            Box::new(move |_| sink.set(sink.get() + 1)),
        );
        transport.inject("/a", json!({}));
        transport.unsubscribe(id);
        transport.dispatch_pending();
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn unknown_services_take_the_failure_path() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let failed = Rc::new(Cell::new(false));
        let flag = failed.clone();
        transport.call_service(
            "/nope",
            json!({}),
            Box::new(|_| panic!("no service is advertised")),
            Box::new(move |e| flag.set(matches!(e, Error::ServiceUnavailable(_)))),
        );
        transport.dispatch_pending();
        assert!(failed.get());
    }
}
