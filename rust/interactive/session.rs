//! One interactive marker: its anchored controls, the drag state machine,
//! and the feedback it owes the server.

use std::{
    rc::Rc,
    time::{Duration, Instant},
};

use glam::DVec3;
use serde::Deserialize;

use super::{
    control::{Control, DragReference, InteractionMode, OrientationMode, build_visual},
    menu::Menu,
};
use crate::{
    events::Emitter,
    logging::Logger,
    math::{Pose, Ray, Transform, compose},
    msgs::{
        std_msgs::Header,
        visualization_msgs::{
            InteractiveMarker, InteractiveMarkerFeedback, interactive_marker_feedback as feedback,
        },
    },
    scene::{AnchoredNode, AnchoredNodeOptions, NodeHandle, Object3D, RenderSink, Resources},
    tf::{TransformStore, normalize_frame_id},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identifies this viewer in feedback messages.
    pub client_id: String,
    /// Feedback is re-sent this often while a drag is held.
    pub resend_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: "edgefirst-scene".to_owned(),
            resend_interval_ms: 250,
        }
    }
}

impl SessionConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// A pointer event that hit one of the marker's controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub button: PointerButton,
    /// Pointer ray in the fixed frame.
    pub ray: Ray,
    /// Where the ray hit the control, when the picker knows.
    pub point: Option<DVec3>,
}

impl PointerEvent {
    pub fn primary(ray: Ray) -> Self {
        Self {
            button: PointerButton::Primary,
            ray,
            point: None,
        }
    }

    pub fn at(mut self, point: DVec3) -> Self {
        self.point = Some(point);
        self
    }
}

/// Whether an event was handled; a consumed event must not reach other
/// controls.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    Consumed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractiveEvent {
    PoseChanged { pose: Pose, from_server: bool },
    DragStart { control: String },
    DragEnd { control: String },
    MenuSelect { entry_id: u32, control: String },
    ButtonClick { control: String },
}

/// Holds at most one value; a newer value replaces an older one.
#[derive(Debug, Clone, PartialEq)]
pub struct Mailbox<T>(Option<T>);

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Mailbox<T> {
    /// Returns true when an unread value was overwritten.
    pub fn put(&mut self, value: T) -> bool {
        self.0.replace(value).is_some()
    }

    pub fn take(&mut self) -> Option<T> {
        self.0.take()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

struct Drag {
    control: usize,
    start_local: Pose,
    start_world: Pose,
    frame: Transform,
    reference: DragReference,
}

enum DragState {
    Idle,
    Dragging(Drag),
}

struct Resend {
    due: Instant,
    feedback: InteractiveMarkerFeedback,
}

pub struct InteractiveMarkerSession {
    config: SessionConfig,
    name: String,
    description: String,
    frame_id: String,
    scale: f64,
    controls: Vec<Control>,
    menu: Menu,
    node: AnchoredNode,
    state: DragState,
    server_pose: Mailbox<Pose>,
    outbox: Vec<InteractiveMarkerFeedback>,
    resend: Option<Resend>,
    events: Emitter<InteractiveEvent>,
    log: Logger,
}

impl InteractiveMarkerSession {
    pub fn new(
        message: &InteractiveMarker,
        config: SessionConfig,
        store: Rc<dyn TransformStore>,
        resources: &Resources,
        log: Logger,
    ) -> Self {
        let frame_id = normalize_frame_id(&message.header.frame_id).to_owned();
        let pose: Pose = message.pose.into();
        let scale = f64::from(message.scale);

        let mut controls = Vec::with_capacity(message.controls.len());
        let mut group = Object3D::group("controls");
        for control_message in &message.controls {
            let control = Control::from_message(control_message, &log);
            let visual = build_visual(&control, control_message, scale, resources, &log)
                .with_pose(&Pose::new(
                    DVec3::ZERO,
                    control.relative_orientation(pose.orientation),
                ));
            group = group.with_child(visual);
            controls.push(control);
        }
        let menu = Menu::from_entries(&message.menu_entries, &log);

        let mut options = AnchoredNodeOptions::new(group).pose(pose);
        if frame_id.is_empty() {
            log.warn(format_args!(
                "interactive marker {:?} has no frame id, placing it in the fixed frame",
                message.name
            ));
        } else {
            options = options.frame(frame_id.clone(), store);
        }

        Self {
            config,
            name: message.name.clone(),
            description: message.description.clone(),
            frame_id,
            scale,
            controls,
            menu,
            node: AnchoredNode::new(options),
            state: DragState::Idle,
            server_pose: Mailbox::default(),
            outbox: Vec::new(),
            resend: None,
            events: Emitter::default(),
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn control_index(&self, name: &str) -> Option<usize> {
        self.controls.iter().position(|c| c.name == name)
    }

    pub fn menu(&self) -> &Menu {
        &self.menu
    }

    pub fn node(&self) -> &AnchoredNode {
        &self.node
    }

    pub fn handle(&self) -> NodeHandle {
        self.node.handle()
    }

    pub fn events(&self) -> &Emitter<InteractiveEvent> {
        &self.events
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    pub fn local_pose(&self) -> Pose {
        self.node.local_pose()
    }

    /// Applies a pose pushed by the server. While dragging the pose is
    /// parked and only the latest one is applied when the drag ends.
    pub fn set_server_pose(&mut self, pose: Pose) -> bool {
        if self.is_dragging() {
            if self.server_pose.put(pose) {
                self.log
                    .debug(format_args!("{}: replaced a parked server pose", self.name));
            }
            return false;
        }
        self.apply_local_pose(pose);
        self.events.emit(&InteractiveEvent::PoseChanged {
            pose,
            from_server: true,
        });
        true
    }

    /// Starts a drag or clicks a button.
    pub fn pointer_down(
        &mut self,
        control: usize,
        event: &PointerEvent,
        now: Instant,
    ) -> EventResponse {
        if event.button != PointerButton::Primary || self.is_dragging() {
            return EventResponse::Ignored;
        }
        let Some(spec) = self.controls.get(control) else {
            return EventResponse::Ignored;
        };
        let control_name = spec.name.clone();

        if spec.mode == InteractionMode::Button {
            let message = self.feedback(feedback::BUTTON_CLICK, &control_name, event.point);
            self.outbox.push(message);
            self.events
                .emit(&InteractiveEvent::ButtonClick { control: control_name });
            return EventResponse::Consumed;
        }
        if !spec.mode.is_draggable() {
            return EventResponse::Ignored;
        }

        // nothing to drag against before the frame is known
        let Some(frame) = self.node.frame_transform() else {
            return EventResponse::Ignored;
        };
        let start_local = self.node.local_pose();
        let start_world = compose(&start_local, &frame);
        let Some(reference) = spec.begin_drag(&start_world, &frame, &event.ray, event.point) else {
            self.log.debug(format_args!(
                "{}: degenerate drag start on {control_name:?}",
                self.name
            ));
            return EventResponse::Ignored;
        };

        self.node.hold();
        self.state = DragState::Dragging(Drag {
            control,
            start_local,
            start_world,
            frame,
            reference,
        });
        let message = self.feedback(feedback::MOUSE_DOWN, &control_name, event.point);
        self.send_tracked(message, now);
        self.events
            .emit(&InteractiveEvent::DragStart { control: control_name });
        EventResponse::Consumed
    }

    /// Moves the marker with the active drag.
    pub fn pointer_move(&mut self, event: &PointerEvent, now: Instant) -> EventResponse {
        let DragState::Dragging(drag) = &self.state else {
            return EventResponse::Ignored;
        };
        let Some(world) = drag.reference.target(&drag.start_world, &event.ray) else {
            // still ours, the pointer just has no usable hit
            return EventResponse::Consumed;
        };
        let local = drag.frame.as_pose().inverse().mul_pose(&world);
        let control_name = self.controls[drag.control].name.clone();

        self.apply_local_pose(local);
        let message = self.feedback(feedback::POSE_UPDATE, &control_name, event.point);
        self.send_tracked(message, now);
        self.events.emit(&InteractiveEvent::PoseChanged {
            pose: local,
            from_server: false,
        });
        EventResponse::Consumed
    }

    /// Ends the drag, reconciling with whatever the server sent meanwhile.
    pub fn pointer_up(&mut self, event: &PointerEvent) -> EventResponse {
        if event.button != PointerButton::Primary {
            return EventResponse::Ignored;
        }
        let DragState::Dragging(drag) = std::mem::replace(&mut self.state, DragState::Idle) else {
            return EventResponse::Ignored;
        };
        self.resend = None;
        let control_name = self.controls[drag.control].name.clone();

        self.node.release();
        if let Some(pose) = self.server_pose.take() {
            self.apply_local_pose(pose);
            self.events.emit(&InteractiveEvent::PoseChanged {
                pose,
                from_server: true,
            });
        }
        let message = self.feedback(feedback::MOUSE_UP, &control_name, event.point);
        self.outbox.push(message);
        self.events
            .emit(&InteractiveEvent::DragEnd { control: control_name });
        EventResponse::Consumed
    }

    /// Drops an active drag without reporting a pose, restoring the pose it
    /// started from unless the server sent a newer one.
    pub fn cancel_drag(&mut self) -> bool {
        let DragState::Dragging(drag) = std::mem::replace(&mut self.state, DragState::Idle) else {
            return false;
        };
        self.resend = None;
        self.node.release();
        let pose = self.server_pose.take().unwrap_or(drag.start_local);
        self.apply_local_pose(pose);
        true
    }

    /// Selects a menu entry. Only leaf entries can be selected.
    pub fn select_menu(&mut self, entry_id: u32, control: Option<usize>) -> bool {
        if !self.menu.find(entry_id).is_some_and(|item| item.is_leaf()) {
            self.log.debug(format_args!(
                "{}: menu entry {entry_id} is not selectable",
                self.name
            ));
            return false;
        }
        let control_name = control
            .and_then(|index| self.controls.get(index))
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let mut message = self.feedback(feedback::MENU_SELECT, &control_name, None);
        message.menu_entry_id = entry_id;
        self.outbox.push(message);
        self.events.emit(&InteractiveEvent::MenuSelect {
            entry_id,
            control: control_name,
        });
        true
    }

    /// Re-sends the last drag feedback when the interval elapsed without a
    /// newer one. Returns true when a message was queued.
    pub fn poll(&mut self, now: Instant) -> bool {
        let interval = self.config.resend_interval();
        let Some(resend) = self.resend.as_mut() else {
            return false;
        };
        if now < resend.due {
            return false;
        }
        resend.due = now + interval;
        let message = resend.feedback.clone();
        self.outbox.push(message);
        true
    }

    /// Feedback queued since the last call, oldest first.
    pub fn take_feedback(&mut self) -> Vec<InteractiveMarkerFeedback> {
        std::mem::take(&mut self.outbox)
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        self.node.render(path, sink);
    }

    pub fn dispose(&mut self) {
        self.state = DragState::Idle;
        self.resend = None;
        self.server_pose.take();
        self.outbox.clear();
        self.node.dispose();
        self.events.clear();
    }

    fn send_tracked(&mut self, message: InteractiveMarkerFeedback, now: Instant) {
        self.resend = Some(Resend {
            due: now + self.config.resend_interval(),
            feedback: message.clone(),
        });
        self.outbox.push(message);
    }

    fn apply_local_pose(&self, pose: Pose) {
        self.node.set_local_pose(pose);
        self.node.refresh();
        if self
            .controls
            .iter()
            .all(|c| c.orientation_mode != OrientationMode::Fixed)
        {
            return;
        }
        let controls = &self.controls;
        self.node.with_child_mut(|group| {
            for (control, visual) in controls.iter().zip(group.children.iter_mut()) {
                if control.orientation_mode == OrientationMode::Fixed {
                    visual.set_pose(&Pose::new(
                        DVec3::ZERO,
                        control.relative_orientation(pose.orientation),
                    ));
                }
            }
        });
    }

    fn feedback(
        &self,
        event_type: u8,
        control: &str,
        point: Option<DVec3>,
    ) -> InteractiveMarkerFeedback {
        InteractiveMarkerFeedback {
            header: Header::with_frame(self.frame_id.clone()),
            client_id: self.config.client_id.clone(),
            marker_name: self.name.clone(),
            control_name: control.to_owned(),
            event_type,
            pose: self.node.local_pose().into(),
            menu_entry_id: 0,
            mouse_point: point.unwrap_or_default().into(),
            mouse_point_valid: point.is_some(),
        }
    }
}
