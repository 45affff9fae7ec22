//! Topic clients feeding a [`MarkerSetManager`].

use std::{cell::RefCell, rc::Rc, time::Instant};

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use super::manager::{MarkerSetConfig, MarkerSetManager};
use crate::{
    events::{Emitter, ListenerId},
    logging::Logger,
    msgs::{
        self,
        visualization_msgs::{Marker, MarkerArray},
    },
    scene::{RenderSink, Resources},
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

/// A message carrying markers, applied in order.
pub trait MarkerSource: DeserializeOwned + 'static {
    const MESSAGE_TYPE: &'static str;
    const DEFAULT_TOPIC: &'static str;

    fn markers(&self) -> &[Marker];
}

impl MarkerSource for Marker {
    const MESSAGE_TYPE: &'static str = "visualization_msgs/Marker";
    const DEFAULT_TOPIC: &'static str = "/visualization_marker";

    fn markers(&self) -> &[Marker] {
        std::slice::from_ref(self)
    }
}

impl MarkerSource for MarkerArray {
    const MESSAGE_TYPE: &'static str = "visualization_msgs/MarkerArray";
    const DEFAULT_TOPIC: &'static str = "/visualization_marker_array";

    fn markers(&self) -> &[Marker] {
        &self.markers
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarkerClientConfig {
    /// Defaults to the conventional topic for the message type.
    pub topic: Option<String>,
    #[serde(flatten)]
    pub set: MarkerSetConfig,
}

/// Fired after every processed message so list views can refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkersChanged;

pub struct MarkerTopicClient<M: MarkerSource> {
    transport: Rc<dyn Transport>,
    subscription: Option<SubscriptionId>,
    manager: Rc<RefCell<MarkerSetManager>>,
    changes: Rc<Emitter<MarkersChanged>>,
    _message: std::marker::PhantomData<M>,
}

pub type MarkerClient = MarkerTopicClient<Marker>;
pub type MarkerArrayClient = MarkerTopicClient<MarkerArray>;

impl<M: MarkerSource> MarkerTopicClient<M> {
    pub fn new(
        config: MarkerClientConfig,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let topic = config.topic.as_deref().unwrap_or(M::DEFAULT_TOPIC).to_owned();
        let manager = Rc::new(RefCell::new(MarkerSetManager::new(
            config.set,
            store,
            resources,
            log.clone(),
        )));
        let changes = Rc::new(Emitter::default());

        let weak_manager = Rc::downgrade(&manager);
        let weak_changes = Rc::downgrade(&changes);
        let subscription = transport.subscribe(
            &TopicSpec::new(&topic, M::MESSAGE_TYPE),
            Box::new(move |message: &Value| {
                let (Some(manager), Some(changes)) = (weak_manager.upgrade(), weak_changes.upgrade())
                else {
                    return;
                };
                let message = match msgs::from_value::<M>(message) {
                    Ok(message) => message,
                    Err(err) => {
                        log.warn(format_args!("skipping markers: {err}"));
                        return;
                    }
                };
                {
                    let Ok(mut manager) = manager.try_borrow_mut() else {
                        return;
                    };
                    let now = Instant::now();
                    for marker in message.markers() {
                        manager.apply(marker, now);
                    }
                }
                changes.emit(&MarkersChanged);
            }),
        );

        Self {
            transport,
            subscription: Some(subscription),
            manager,
            changes,
            _message: std::marker::PhantomData,
        }
    }

    /// Applies a message directly, as if received at `now`.
    pub fn process(&self, message: &M, now: Instant) {
        {
            let mut manager = self.manager.borrow_mut();
            for marker in message.markers() {
                manager.apply(marker, now);
            }
        }
        self.changes.emit(&MarkersChanged);
    }

    pub fn on_change(&self, listener: impl FnMut(&MarkersChanged) + 'static) -> ListenerId {
        self.changes.on(listener)
    }

    pub fn with_manager<R>(&self, f: impl FnOnce(&MarkerSetManager) -> R) -> R {
        f(&self.manager.borrow())
    }

    /// Expires stale markers; call periodically.
    pub fn sweep(&self, now: Instant) -> usize {
        let removed = self.manager.borrow_mut().sweep(now);
        if removed > 0 {
            self.changes.emit(&MarkersChanged);
        }
        removed
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        self.manager.borrow_mut().render(path, sink);
    }

    pub fn dispose(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.transport.unsubscribe(id);
        }
        self.manager.borrow_mut().dispose();
        self.changes.clear();
    }
}

impl<M: MarkerSource> Drop for MarkerTopicClient<M> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        msgs::visualization_msgs::marker,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
        transport::LoopbackTransport,
    };
    use std::cell::Cell;

    fn cube(id: i32, action: i32) -> Marker {
        let mut marker = Marker {
            ns: "boxes".into(),
            id,
            kind: marker::CUBE,
            action,
            ..Default::default()
        };
        marker.header.frame_id = "map".into();
        marker
    }

    #[test]
    fn delete_all_inside_an_array_applies_in_order() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let client = MarkerArrayClient::new(
            MarkerClientConfig::default(),
            transport.clone(),
            store,
            Resources::new(),
            Logger::detached("markers"),
        );
        let changes = Rc::new(Cell::new(0));
        let counter = changes.clone();
        client.on_change(move |_| counter.set(counter.get() + 1));

        let array = MarkerArray {
            markers: vec![
                cube(1, marker::ADD),
                cube(2, marker::ADD),
                cube(0, marker::DELETEALL),
                cube(3, marker::ADD),
            ],
        };
        transport.inject(
            "/visualization_marker_array",
            serde_json::to_value(&array).unwrap(),
        );
        transport.dispatch_pending();

        assert_eq!(changes.get(), 1);
        let keys: Vec<i32> = client.with_manager(|m| m.keys().map(|k| k.id).collect());
        assert_eq!(keys, vec![3]);
    }

    #[test]
    fn dispose_stops_delivery() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let mut client = MarkerClient::new(
            MarkerClientConfig::default(),
            transport.clone(),
            store,
            resources.clone(),
            Logger::detached("markers"),
        );
        client.process(&cube(1, marker::ADD), Instant::now());
        assert!(resources.live_count() > 0);

        client.dispose();
        assert_eq!(resources.live_count(), 0);
        transport.inject(
            "/visualization_marker",
            serde_json::to_value(cube(2, marker::ADD)).unwrap(),
        );
        transport.dispatch_pending();
        assert!(client.with_manager(MarkerSetManager::is_empty));
    }
}
