//! Interactive marker server protocol: initial state, incremental updates,
//! and feedback publishing.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc, time::Instant};

use serde::Deserialize;
use serde_json::Value;

use super::session::{EventResponse, InteractiveMarkerSession, PointerEvent, SessionConfig};
use crate::{
    events::{Emitter, ListenerId},
    logging::Logger,
    msgs::{
        self,
        visualization_msgs::{
            InteractiveMarker, InteractiveMarkerInit, InteractiveMarkerUpdate,
            interactive_marker_update,
        },
    },
    scene::{RenderSink, Resources},
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InteractiveMarkerConfig {
    /// Server namespace; `update_full`, `update` and `feedback` live below it.
    pub topic: String,
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Default for InteractiveMarkerConfig {
    fn default() -> Self {
        Self {
            topic: "/basic_controls".to_owned(),
            session: SessionConfig::default(),
        }
    }
}

/// Fired when markers appear or disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveMarkersChanged;

struct ClientState {
    config: InteractiveMarkerConfig,
    store: Rc<dyn TransformStore>,
    resources: Resources,
    log: Logger,
    sessions: BTreeMap<String, InteractiveMarkerSession>,
    /// Render paths to clear on the next pass.
    removed: Vec<String>,
    server_id: Option<String>,
}

impl ClientState {
    fn init(&mut self, message: &InteractiveMarkerInit) {
        self.log.debug(format_args!(
            "init from {:?} with {} markers",
            message.server_id,
            message.markers.len()
        ));
        self.server_id = Some(message.server_id.clone());
        // Dragged markers survive; `upsert` parks their new pose.
        let names: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.is_dragging())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            self.erase(&name);
        }
        for marker in &message.markers {
            self.upsert(marker);
        }
    }

    fn update(&mut self, message: &InteractiveMarkerUpdate) {
        if message.kind == interactive_marker_update::KEEP_ALIVE {
            return;
        }
        if self.server_id.is_none() {
            self.server_id = Some(message.server_id.clone());
        }
        for marker in &message.markers {
            self.upsert(marker);
        }
        for pose in &message.poses {
            match self.sessions.get_mut(&pose.name) {
                Some(session) => {
                    session.set_server_pose(pose.pose.into());
                }
                None => self
                    .log
                    .debug(format_args!("pose for unknown marker {:?}", pose.name)),
            }
        }
        for name in &message.erases {
            self.erase(name);
        }
    }

    /// A marker that is being dragged keeps its controls and only takes the
    /// new pose once the drag ends.
    fn upsert(&mut self, marker: &InteractiveMarker) {
        if let Some(session) = self.sessions.get_mut(&marker.name) {
            if session.is_dragging() {
                session.set_server_pose(marker.pose.into());
                return;
            }
        }
        self.erase(&marker.name);
        let session = InteractiveMarkerSession::new(
            marker,
            self.config.session.clone(),
            Rc::clone(&self.store),
            &self.resources,
            self.log.child(&marker.name),
        );
        self.sessions.insert(marker.name.clone(), session);
    }

    fn erase(&mut self, name: &str) -> bool {
        let Some(mut session) = self.sessions.remove(name) else {
            return false;
        };
        session.dispose();
        self.removed.push(name.to_owned());
        true
    }
}

/// Mirrors the markers of one interactive marker server and reports user
/// interaction back to it.
pub struct InteractiveMarkerClient {
    transport: Rc<dyn Transport>,
    feedback_topic: String,
    subscriptions: Vec<SubscriptionId>,
    state: Rc<RefCell<ClientState>>,
    changes: Rc<Emitter<InteractiveMarkersChanged>>,
    log: Logger,
}

impl InteractiveMarkerClient {
    pub fn new(
        config: InteractiveMarkerConfig,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let topic = config.topic.trim_end_matches('/').to_owned();
        let state = Rc::new(RefCell::new(ClientState {
            config,
            store,
            resources,
            log: log.clone(),
            sessions: BTreeMap::new(),
            removed: Vec::new(),
            server_id: None,
        }));
        let changes = Rc::new(Emitter::default());

        let subscriptions = vec![
            subscribe::<InteractiveMarkerInit>(
                transport.as_ref(),
                TopicSpec::new(
                    format!("{topic}/update_full"),
                    "visualization_msgs/InteractiveMarkerInit",
                ),
                &state,
                &changes,
                &log,
                ClientState::init,
            ),
            subscribe::<InteractiveMarkerUpdate>(
                transport.as_ref(),
                TopicSpec::new(
                    format!("{topic}/update"),
                    "visualization_msgs/InteractiveMarkerUpdate",
                ),
                &state,
                &changes,
                &log,
                ClientState::update,
            ),
        ];

        Self {
            transport,
            feedback_topic: format!("{topic}/feedback"),
            subscriptions,
            state,
            changes,
            log,
        }
    }

    pub fn feedback_topic(&self) -> &str {
        &self.feedback_topic
    }

    pub fn on_change(
        &self,
        listener: impl FnMut(&InteractiveMarkersChanged) + 'static,
    ) -> ListenerId {
        self.changes.on(listener)
    }

    pub fn names(&self) -> Vec<String> {
        self.state.borrow().sessions.keys().cloned().collect()
    }

    pub fn server_id(&self) -> Option<String> {
        self.state.borrow().server_id.clone()
    }

    /// Runs `f` on the named marker. Session listeners must not call back
    /// into this client.
    pub fn with_session<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut InteractiveMarkerSession) -> R,
    ) -> Option<R> {
        let result = {
            let mut state = self.state.borrow_mut();
            state.sessions.get_mut(name).map(f)
        };
        self.flush();
        result
    }

    pub fn process_init(&self, message: &InteractiveMarkerInit) {
        self.state.borrow_mut().init(message);
        self.changes.emit(&InteractiveMarkersChanged);
    }

    pub fn process_update(&self, message: &InteractiveMarkerUpdate) {
        self.state.borrow_mut().update(message);
        if message.kind != interactive_marker_update::KEEP_ALIVE {
            self.changes.emit(&InteractiveMarkersChanged);
        }
    }

    pub fn pointer_down(
        &self,
        marker: &str,
        control: &str,
        event: &PointerEvent,
        now: Instant,
    ) -> EventResponse {
        self.with_session(marker, |session| match session.control_index(control) {
            Some(index) => session.pointer_down(index, event, now),
            None => EventResponse::Ignored,
        })
        .unwrap_or(EventResponse::Ignored)
    }

    pub fn pointer_move(&self, marker: &str, event: &PointerEvent, now: Instant) -> EventResponse {
        self.with_session(marker, |session| session.pointer_move(event, now))
            .unwrap_or(EventResponse::Ignored)
    }

    pub fn pointer_up(&self, marker: &str, event: &PointerEvent) -> EventResponse {
        self.with_session(marker, |session| session.pointer_up(event))
            .unwrap_or(EventResponse::Ignored)
    }

    pub fn select_menu(&self, marker: &str, entry_id: u32, control: Option<&str>) -> bool {
        self.with_session(marker, |session| {
            let index = control.and_then(|name| session.control_index(name));
            session.select_menu(entry_id, index)
        })
        .unwrap_or(false)
    }

    /// Drives drag feedback re-sends; call every tick.
    pub fn poll(&self, now: Instant) {
        {
            let mut state = self.state.borrow_mut();
            for session in state.sessions.values_mut() {
                session.poll(now);
            }
        }
        self.flush();
    }

    /// Publishes queued feedback from every session.
    fn flush(&self) {
        let queued: Vec<_> = {
            let mut state = self.state.borrow_mut();
            state
                .sessions
                .values_mut()
                .flat_map(|session| session.take_feedback())
                .collect()
        };
        for feedback in queued {
            match serde_json::to_value(&feedback) {
                Ok(message) => self.transport.publish(&self.feedback_topic, message),
                Err(err) => self.log.error(format_args!("cannot encode feedback: {err}")),
            }
        }
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        let mut state = self.state.borrow_mut();
        for name in state.removed.drain(..) {
            sink.remove(&session_path(path, &name));
        }
        for (name, session) in &state.sessions {
            session.render(&session_path(path, name), sink);
        }
    }

    pub fn dispose(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
        let mut state = self.state.borrow_mut();
        let sessions = std::mem::take(&mut state.sessions);
        for (_, mut session) in sessions {
            session.dispose();
        }
        self.changes.clear();
    }
}

impl Drop for InteractiveMarkerClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn session_path(base: &str, name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{base}/{name}")
}

fn subscribe<M: serde::de::DeserializeOwned + 'static>(
    transport: &dyn Transport,
    topic: TopicSpec,
    state: &Rc<RefCell<ClientState>>,
    changes: &Rc<Emitter<InteractiveMarkersChanged>>,
    log: &Logger,
    apply: fn(&mut ClientState, &M),
) -> SubscriptionId {
    let weak_state = Rc::downgrade(state);
    let weak_changes = Rc::downgrade(changes);
    let log = log.clone();
    let name = topic.name.clone();
    transport.subscribe(
        &topic,
        Box::new(move |message: &Value| {
            let (Some(state), Some(changes)) = (weak_state.upgrade(), weak_changes.upgrade())
            else {
                return;
            };
            let message = match msgs::from_value::<M>(message) {
                Ok(message) => message,
                Err(err) => {
                    log.warn(format_args!("skipping message on {name}: {err}"));
                    return;
                }
            };
            {
                let Ok(mut state) = state.try_borrow_mut() else {
                    return;
                };
                apply(&mut state, &message);
            }
            changes.emit(&InteractiveMarkersChanged);
        }),
    )
}
