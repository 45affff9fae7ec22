//! Keyed marker lifecycle: add, update or rebuild, delete, and expiry.

use std::{
    collections::BTreeMap,
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

use serde::Deserialize;

use super::marker::MarkerView;
use crate::{
    events::Emitter,
    logging::Logger,
    msgs::visualization_msgs::{Marker, marker},
    scene::{NodeHandle, RenderSink, Resources},
    tf::TransformStore,
};

/// Identity of a marker within a set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerKey {
    pub ns: String,
    pub id: i32,
}

impl MarkerKey {
    pub fn new(ns: impl Into<String>, id: i32) -> Self {
        Self { ns: ns.into(), id }
    }

    pub fn of(marker: &Marker) -> Self {
        Self::new(marker.ns.clone(), marker.id)
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEvent {
    Added(MarkerKey),
    Updated(MarkerKey),
    /// The existing renderable could not take the change and was replaced.
    Rebuilt(MarkerKey),
    Removed(MarkerKey),
    Expired(MarkerKey),
    Cleared,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarkerSetConfig {
    /// Seconds without an update after which a marker is swept; 0 disables.
    pub lifetime: f64,
}

struct Entry {
    view: MarkerView,
    updated: Instant,
}

pub struct MarkerSetManager {
    config: MarkerSetConfig,
    store: Rc<dyn TransformStore>,
    resources: Resources,
    log: Logger,
    entries: BTreeMap<MarkerKey, Entry>,
    /// Render paths to clear on the next pass.
    removed: Vec<MarkerKey>,
    events: Emitter<MarkerEvent>,
}

impl MarkerSetManager {
    pub fn new(
        config: MarkerSetConfig,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        Self {
            config,
            store,
            resources,
            log,
            entries: BTreeMap::new(),
            removed: Vec::new(),
            events: Emitter::default(),
        }
    }

    pub fn events(&self) -> &Emitter<MarkerEvent> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &MarkerKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MarkerKey> {
        self.entries.keys()
    }

    pub fn get(&self, key: &MarkerKey) -> Option<&MarkerView> {
        self.entries.get(key).map(|entry| &entry.view)
    }

    pub fn handle(&self, key: &MarkerKey) -> Option<NodeHandle> {
        self.get(key).map(MarkerView::handle)
    }

    /// Applies one marker message received at `now`.
    pub fn apply(&mut self, message: &Marker, now: Instant) {
        match message.action {
            marker::ADD => self.add(message, now),
            marker::DELETE => {
                let key = MarkerKey::of(message);
                if self.remove(&key) {
                    self.events.emit(&MarkerEvent::Removed(key));
                }
            }
            marker::DELETEALL => self.clear(),
            marker::MODIFY => self.log.warn(format_args!(
                "ignoring deprecated MODIFY action for {}",
                MarkerKey::of(message)
            )),
            other => self.log.warn(format_args!(
                "ignoring unknown action {other} for {}",
                MarkerKey::of(message)
            )),
        }
    }

    fn add(&mut self, message: &Marker, now: Instant) {
        let key = MarkerKey::of(message);
        let updated = self.entries.get_mut(&key).map(|entry| {
            let accepted = entry.view.update(message);
            if accepted {
                entry.view.set_pose(message.pose.into());
                entry.updated = now;
            }
            accepted
        });
        let event = match updated {
            Some(true) => MarkerEvent::Updated(key),
            Some(false) => {
                self.remove(&key);
                self.insert(key.clone(), message, now);
                MarkerEvent::Rebuilt(key)
            }
            None => {
                self.insert(key.clone(), message, now);
                MarkerEvent::Added(key)
            }
        };
        self.events.emit(&event);
    }

    fn insert(&mut self, key: MarkerKey, message: &Marker, now: Instant) {
        let view = MarkerView::new(
            message,
            Rc::clone(&self.store),
            &self.resources,
            &self.log,
        );
        view.set_pose(message.pose.into());
        self.entries.insert(
            key,
            Entry {
                view,
                updated: now,
            },
        );
    }

    /// Unlinks and disposes one marker.
    pub fn remove(&mut self, key: &MarkerKey) -> bool {
        let Some(mut entry) = self.entries.remove(key) else {
            return false;
        };
        entry.view.dispose();
        self.removed.push(key.clone());
        true
    }

    /// Disposes every marker.
    pub fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for (key, mut entry) in entries {
            entry.view.dispose();
            self.removed.push(key);
        }
        self.events.emit(&MarkerEvent::Cleared);
    }

    /// Removes markers not updated within the configured lifetime. Returns
    /// how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        if self.config.lifetime <= 0.0 {
            return 0;
        }
        let Ok(lifetime) = Duration::try_from_secs_f64(self.config.lifetime) else {
            return 0;
        };
        let stale: Vec<MarkerKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.updated) > lifetime)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.remove(key);
            self.log.debug(format_args!("marker {key} expired"));
            self.events.emit(&MarkerEvent::Expired(key.clone()));
        }
        stale.len()
    }

    /// Clears removed markers from the sink, then draws what changed.
    pub fn render(&mut self, path: &str, sink: &mut dyn RenderSink) {
        for key in self.removed.drain(..) {
            sink.remove(&marker_path(path, &key));
        }
        for (key, entry) in &self.entries {
            entry.view.render(&marker_path(path, key), sink);
        }
    }

    pub fn dispose(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for (_, mut entry) in entries {
            entry.view.dispose();
        }
        self.events.clear();
    }
}

/// `{base}/{ns}/{id}`, with an empty namespace written as `_`.
pub fn marker_path(base: &str, key: &MarkerKey) -> String {
    let ns: String = key
        .ns
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let ns = if ns.is_empty() { "_".to_owned() } else { ns };
    format!("{base}/{ns}/{}", key.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        msgs::{geometry_msgs::Point, std_msgs::ColorRGBA},
        scene::RecordingSink,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
    };
    use std::cell::RefCell;

    fn manager(lifetime: f64) -> (MarkerSetManager, Resources, Rc<FrameTransformStore>) {
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let manager = MarkerSetManager::new(
            MarkerSetConfig { lifetime },
            store.clone(),
            resources.clone(),
            Logger::detached("markers"),
        );
        (manager, resources, store)
    }

    fn sphere(ns: &str, id: i32) -> Marker {
        let mut marker = Marker {
            ns: ns.into(),
            id,
            kind: marker::SPHERE,
            color: ColorRGBA::new(0.0, 1.0, 0.0, 1.0),
            ..Default::default()
        };
        marker.header.frame_id = "base_link".into();
        marker
    }

    #[test]
    fn pose_is_reapplied_on_every_add() {
        let (mut manager, _, _) = manager(0.0);
        let now = Instant::now();
        let mut marker = sphere("a", 1);
        manager.apply(&marker, now);
        marker.pose.position.x = 4.0;
        manager.apply(&marker, now);
        let key = MarkerKey::new("a", 1);
        let local = manager.get(&key).map(|v| v.node().local_pose().position.x);
        assert_eq!(local, Some(4.0));
    }

    #[test]
    fn delete_of_an_absent_key_is_a_no_op() {
        let (mut manager, _, _) = manager(0.0);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        manager
            .events()
            .on(move |event: &MarkerEvent| sink.borrow_mut().push(event.clone()));

        let mut marker = sphere("a", 1);
        marker.action = marker::DELETE;
        manager.apply(&marker, Instant::now());
        assert!(events.borrow().is_empty());

        marker.action = marker::MODIFY;
        manager.apply(&marker, Instant::now());
        marker.action = 7;
        manager.apply(&marker, Instant::now());
        assert!(manager.is_empty());
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn type_change_rebuilds() {
        let (mut manager, resources, _) = manager(0.0);
        let now = Instant::now();
        let mut marker = sphere("a", 1);
        manager.apply(&marker, now);
        let key = MarkerKey::new("a", 1);
        let first = manager.handle(&key).unwrap();

        marker.kind = marker::LINE_STRIP;
        marker.points = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0)];
        manager.apply(&marker, now);
        let second = manager.handle(&key).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.dispose_count(), 1);
        assert_eq!(manager.len(), 1);

        manager.dispose();
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn sweep_removes_stale_markers_only() {
        let (mut manager, resources, store) = manager(2.0);
        let start = Instant::now();
        manager.apply(&sphere("a", 1), start);
        manager.apply(&sphere("a", 2), start + Duration::from_secs(2));

        assert_eq!(manager.sweep(start + Duration::from_secs(2)), 0);
        assert_eq!(manager.sweep(start + Duration::from_secs(3)), 1);
        assert!(!manager.contains(&MarkerKey::new("a", 1)));
        assert!(manager.contains(&MarkerKey::new("a", 2)));
        assert_eq!(store.subscriber_count(), 1);

        manager.clear();
        assert_eq!(resources.live_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn zero_lifetime_never_sweeps() {
        let (mut manager, _, _) = manager(0.0);
        let start = Instant::now();
        manager.apply(&sphere("a", 1), start);
        assert_eq!(manager.sweep(start + Duration::from_secs(3600)), 0);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn delete_all_disposes_every_marker_once() {
        let (mut manager, resources, store) = manager(0.0);
        store.set_frame_transform("base_link", crate::math::Transform::IDENTITY);
        let baseline = resources.live_count();
        let now = Instant::now();

        let mut markers = Vec::new();
        for (ns, id) in [("a", 0), ("a", 1), ("b", 0), ("", 7)] {
            markers.push(sphere(ns, id));
        }
        let mut strip = sphere("path", 2);
        strip.kind = marker::LINE_STRIP;
        strip.points = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0)];
        markers.push(strip);
        for marker in &markers {
            manager.apply(marker, now);
        }
        assert_eq!(manager.len(), markers.len());
        assert!(resources.live_count() > baseline);

        let keys: Vec<MarkerKey> = manager.keys().cloned().collect();
        let handles: Vec<NodeHandle> = keys.iter().filter_map(|k| manager.handle(k)).collect();
        let mut sink = RecordingSink::default();
        manager.render("markers", &mut sink);

        let delete_all = Marker {
            action: marker::DELETEALL,
            ..Default::default()
        };
        manager.apply(&delete_all, now);
        assert!(manager.is_empty());
        assert_eq!(resources.live_count(), baseline);
        for handle in &handles {
            assert!(handle.is_disposed());
            assert_eq!(handle.dispose_count(), 1);
        }

        manager.render("markers", &mut sink);
        for key in &keys {
            assert!(sink.removed.contains(&marker_path("markers", key)));
        }
        assert_eq!(sink.removed.len(), keys.len());
    }

    #[test]
    fn removed_markers_are_cleared_from_the_sink() {
        let (mut manager, _, store) = manager(0.0);
        store.set_frame_transform("base_link", crate::math::Transform::IDENTITY);
        let now = Instant::now();
        manager.apply(&sphere("", 3), now);
        let mut sink = RecordingSink::default();
        manager.render("markers", &mut sink);
        assert!(sink.drawn.iter().any(|(path, _)| path == "markers/_/3"));

        let mut delete = sphere("", 3);
        delete.action = marker::DELETE;
        manager.apply(&delete, now);
        manager.render("markers", &mut sink);
        assert_eq!(sink.removed, vec!["markers/_/3".to_owned()]);
    }
}
