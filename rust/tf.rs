//! Latest-known transforms of named frames relative to one fixed frame.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    rc::Rc,
};

use serde::Deserialize;

use crate::{
    logging::Logger,
    math::Transform,
    msgs::{geometry_msgs::TransformStamped, tf2_msgs::TFMessage},
    transport::SubscriptionId,
};

pub type TransformCallback = Box<dyn FnMut(&Transform)>;

/// Frame transform lookup/subscribe contract consumed by scene nodes.
///
/// A subscription is keyed by the frame and the returned id, so any number of
/// nodes can observe the same frame independently. Once `unsubscribe` returns
/// the callback is never invoked again.
pub trait TransformStore {
    fn subscribe(&self, frame_id: &str, callback: TransformCallback) -> SubscriptionId;
    fn unsubscribe(&self, frame_id: &str, id: SubscriptionId);
}

/// Strips the leading `/` ROS 1 tools put in front of frame ids.
pub fn normalize_frame_id(frame_id: &str) -> &str {
    frame_id.trim_start_matches('/')
}

/// Frame chains longer than this are treated as cycles.
const MAX_CHAIN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameTransformStoreConfig {
    /// Every delivered transform maps a frame into this one.
    pub fixed_frame: String,
    /// Deliver an identity transform on subscribe when the frame is unknown,
    /// instead of leaving subscribers waiting.
    pub synthesize_identity: bool,
    /// Changes at or below both thresholds are not delivered.
    pub translation_threshold: f64,
    pub angular_threshold: f64,
}

impl Default for FrameTransformStoreConfig {
    fn default() -> Self {
        Self {
            fixed_frame: "world".to_owned(),
            synthesize_identity: false,
            translation_threshold: 0.0,
            angular_threshold: 0.0,
        }
    }
}

struct Edge {
    parent: String,
    transform: Transform,
}

struct Subscriber {
    id: SubscriptionId,
    callback: Rc<RefCell<TransformCallback>>,
}

#[derive(Default)]
struct FrameEntry {
    subscribers: Vec<Subscriber>,
    last_delivered: Option<Transform>,
}

/// The process-wide transform table shared by all anchored nodes.
pub struct FrameTransformStore {
    config: FrameTransformStoreConfig,
    log: Logger,
    next_id: Cell<u64>,
    edges: RefCell<HashMap<String, Edge>>,
    frames: RefCell<BTreeMap<String, FrameEntry>>,
}

impl FrameTransformStore {
    pub fn new(config: FrameTransformStoreConfig, log: Logger) -> Rc<Self> {
        let mut config = config;
        config.fixed_frame = normalize_frame_id(&config.fixed_frame).to_owned();
        Rc::new(Self {
            config,
            log,
            next_id: Cell::new(1),
            edges: RefCell::new(HashMap::new()),
            frames: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn fixed_frame(&self) -> &str {
        &self.config.fixed_frame
    }

    /// Records one parent -> child edge and notifies affected subscribers.
    pub fn set_transform(&self, tf: &TransformStamped) {
        if let Some(child) = self.insert_edge(tf) {
            self.notify_affected(&BTreeSet::from([child]));
        }
    }

    /// Records every edge of the message, then notifies each affected frame
    /// once with its fully updated chain.
    pub fn ingest(&self, message: &TFMessage) {
        let changed: BTreeSet<String> = message
            .transforms
            .iter()
            .filter_map(|tf| self.insert_edge(tf))
            .collect();
        if !changed.is_empty() {
            self.notify_affected(&changed);
        }
    }

    /// Sets a frame's transform to the fixed frame directly.
    pub fn set_frame_transform(&self, frame_id: &str, transform: Transform) {
        let frame_id = normalize_frame_id(frame_id).to_owned();
        if frame_id == self.config.fixed_frame {
            return;
        }
        self.edges.borrow_mut().insert(
            frame_id.clone(),
            Edge {
                parent: self.config.fixed_frame.clone(),
                transform,
            },
        );
        self.notify_affected(&BTreeSet::from([frame_id]));
    }

    /// Current transform from `frame_id` to the fixed frame, if its chain is
    /// complete.
    pub fn lookup(&self, frame_id: &str) -> Option<Transform> {
        self.resolve(normalize_frame_id(frame_id))
            .map(|(transform, _)| transform)
    }

    /// Every frame name seen so far, as parent or child.
    pub fn frames(&self) -> Vec<String> {
        let edges = self.edges.borrow();
        let mut names: BTreeSet<String> = edges.keys().cloned().collect();
        names.extend(edges.values().map(|edge| edge.parent.clone()));
        names.into_iter().collect()
    }

    /// Parent of `frame_id`, if an edge for it was received.
    pub fn parent(&self, frame_id: &str) -> Option<String> {
        self.edges
            .borrow()
            .get(normalize_frame_id(frame_id))
            .map(|edge| edge.parent.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames
            .borrow()
            .values()
            .map(|entry| entry.subscribers.len())
            .sum()
    }

    fn insert_edge(&self, tf: &TransformStamped) -> Option<String> {
        let parent = normalize_frame_id(&tf.header.frame_id);
        let child = normalize_frame_id(&tf.child_frame_id);
        if child.is_empty() || parent.is_empty() {
            self.log
                .warn(format_args!("ignoring transform with empty frame id"));
            return None;
        }
        if child == self.config.fixed_frame || child == parent {
            self.log.debug(format_args!(
                "ignoring transform {parent} -> {child}: child is the fixed frame or itself"
            ));
            return None;
        }
        self.edges.borrow_mut().insert(
            child.to_owned(),
            Edge {
                parent: parent.to_owned(),
                transform: tf.transform.into(),
            },
        );
        Some(child.to_owned())
    }

    /// Walks the chain from `frame_id` up to the fixed frame.
    fn resolve(&self, frame_id: &str) -> Option<(Transform, Vec<String>)> {
        if frame_id == self.config.fixed_frame {
            return Some((Transform::IDENTITY, Vec::new()));
        }
        let edges = self.edges.borrow();
        let mut chain = Vec::new();
        let mut transforms = Vec::new();
        let mut current = frame_id;
        while current != self.config.fixed_frame {
            if chain.len() >= MAX_CHAIN {
                self.log.warn(format_args!(
                    "frame {frame_id} does not reach {} within {MAX_CHAIN} hops",
                    self.config.fixed_frame
                ));
                return None;
            }
            let edge = edges.get(current)?;
            chain.push(current.to_owned());
            transforms.push(edge.transform);
            current = &edge.parent;
        }
        let transform = transforms
            .iter()
            .rev()
            .fold(Transform::IDENTITY, |acc, edge| acc.then(edge));
        Some((transform, chain))
    }

    fn is_significant(&self, previous: Option<&Transform>, next: &Transform) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        let (translation, angle) = previous.distance(next);
        translation > self.config.translation_threshold || angle > self.config.angular_threshold
    }

    fn notify_affected(&self, changed: &BTreeSet<String>) {
        let subscribed: Vec<String> = self
            .frames
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.subscribers.is_empty())
            .map(|(frame, _)| frame.clone())
            .collect();

        for frame in subscribed {
            let Some((transform, chain)) = self.resolve(&frame) else {
                continue;
            };
            if !chain.iter().any(|link| changed.contains(link)) {
                continue;
            }
            self.deliver(&frame, transform);
        }
    }

    fn deliver(&self, frame: &str, transform: Transform) {
        let callbacks: Vec<(SubscriptionId, Rc<RefCell<TransformCallback>>)> = {
            let mut frames = self.frames.borrow_mut();
            let Some(entry) = frames.get_mut(frame) else {
                return;
            };
            if !self.is_significant(entry.last_delivered.as_ref(), &transform) {
                return;
            }
            entry.last_delivered = Some(transform);
            entry
                .subscribers
                .iter()
                .map(|s| (s.id, Rc::clone(&s.callback)))
                .collect()
        };
        for (id, callback) in callbacks {
            if self.is_subscribed(frame, id) {
                Self::invoke(&callback, &transform);
            }
        }
    }

    fn invoke(callback: &Rc<RefCell<TransformCallback>>, transform: &Transform) {
        if let Ok(mut callback) = callback.try_borrow_mut() {
            (&mut *callback)(transform);
        }
    }

    fn is_subscribed(&self, frame: &str, id: SubscriptionId) -> bool {
        self.frames
            .borrow()
            .get(frame)
            .is_some_and(|entry| entry.subscribers.iter().any(|s| s.id == id))
    }
}

impl TransformStore for FrameTransformStore {
    fn subscribe(&self, frame_id: &str, callback: TransformCallback) -> SubscriptionId {
        let frame = normalize_frame_id(frame_id).to_owned();
        let id = SubscriptionId::new(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        let callback = Rc::new(RefCell::new(callback));
        self.frames
            .borrow_mut()
            .entry(frame.clone())
            .or_default()
            .subscribers
            .push(Subscriber {
                id,
                callback: Rc::clone(&callback),
            });

        let initial = match self.resolve(&frame) {
            Some((transform, _)) => Some(transform),
            None if self.config.synthesize_identity => Some(Transform::IDENTITY),
            None => None,
        };
        if let Some(transform) = initial {
            if let Some(entry) = self.frames.borrow_mut().get_mut(&frame) {
                entry.last_delivered.get_or_insert(transform);
            }
            Self::invoke(&callback, &transform);
        }
        id
    }

    fn unsubscribe(&self, frame_id: &str, id: SubscriptionId) {
        let frame = normalize_frame_id(frame_id);
        let mut frames = self.frames.borrow_mut();
        if let Some(entry) = frames.get_mut(frame) {
            entry.subscribers.retain(|s| s.id != id);
            if entry.subscribers.is_empty() {
                frames.remove(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::{
        geometry_msgs::{self, Quaternion, Vector3},
        std_msgs::Header,
    };
    use glam::{DQuat, DVec3};

    fn edge(parent: &str, child: &str, x: f64) -> TransformStamped {
        TransformStamped {
            header: Header::with_frame(parent),
            child_frame_id: child.to_owned(),
            transform: geometry_msgs::Transform {
                translation: Vector3::new(x, 0.0, 0.0),
                rotation: Quaternion::IDENTITY,
            },
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<Transform>>>, TransformCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |t: &Transform| sink.borrow_mut().push(*t)))
    }

    fn store() -> Rc<FrameTransformStore> {
        FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        )
    }

    #[test]
    fn chains_resolve_to_the_fixed_frame() {
        let store = store();
        store.set_transform(&edge("world", "base_link", 1.0));
        store.set_transform(&edge("/base_link", "laser", 0.5));
        let laser = store.lookup("laser").unwrap();
        assert!(laser.translation.abs_diff_eq(DVec3::new(1.5, 0.0, 0.0), 1e-12));
        assert_eq!(store.parent("laser").as_deref(), Some("base_link"));
        assert_eq!(store.frames(), vec!["base_link", "laser", "world"]);
    }

    #[test]
    fn parent_updates_reach_descendant_subscribers() {
        let store = store();
        let (seen, callback) = recorder();
        store.subscribe("laser", callback);
        assert!(seen.borrow().is_empty());

        store.set_transform(&edge("base_link", "laser", 0.5));
        assert!(seen.borrow().is_empty(), "chain incomplete, nothing delivered");

        store.set_transform(&edge("world", "base_link", 1.0));
        store.set_transform(&edge("world", "base_link", 2.0));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!((seen[1].translation.x - 2.5).abs() < 1e-12);
    }

    #[test]
    fn known_frames_are_delivered_on_subscribe() {
        let store = store();
        store.set_frame_transform("map", Transform::from_translation(DVec3::Y));
        let (seen, callback) = recorder();
        store.subscribe("/map", callback);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn identity_is_synthesized_when_configured() {
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig {
                synthesize_identity: true,
                ..Default::default()
            },
            Logger::detached("tf"),
        );
        let (seen, callback) = recorder();
        store.subscribe("unknown", callback);
        assert_eq!(seen.borrow().as_slice(), &[Transform::IDENTITY]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_frees_the_entry() {
        let store = store();
        let (seen, callback) = recorder();
        let id = store.subscribe("odom", callback);
        store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        store.unsubscribe("odom", id);
        store.set_frame_transform("odom", Transform::from_translation(DVec3::Z));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn small_changes_below_thresholds_are_suppressed() {
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig {
                translation_threshold: 0.01,
                angular_threshold: 0.01,
                ..Default::default()
            },
            Logger::detached("tf"),
        );
        let (seen, callback) = recorder();
        store.subscribe("odom", callback);
        store.set_frame_transform("odom", Transform::IDENTITY);
        store.set_frame_transform("odom", Transform::from_translation(DVec3::X * 0.001));
        store.set_frame_transform(
            "odom",
            Transform::new(DVec3::ZERO, DQuat::from_rotation_z(0.5)),
        );
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn cycles_are_unresolved() {
        let store = store();
        store.set_transform(&edge("a", "b", 1.0));
        store.set_transform(&edge("b", "a", 1.0));
        assert!(store.lookup("a").is_none());
    }

    #[test]
    fn callbacks_may_unsubscribe_siblings_mid_dispatch() {
        let store = store();
        let (seen, second) = recorder();
        let second_id = Rc::new(Cell::new(None));
        let target = second_id.clone();
        let weak = Rc::downgrade(&store);
        store.subscribe(
            "odom",
            Box::new(move |_| {
                if let (Some(store), Some(id)) = (weak.upgrade(), target.get()) {
                    store.unsubscribe("odom", id);
                }
            }),
        );
        second_id.set(Some(store.subscribe("odom", second)));
        store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        assert!(seen.borrow().is_empty());
    }
}
