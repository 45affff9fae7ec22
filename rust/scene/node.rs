//! Renderables bound to a named frame.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use super::{
    object::{Object3D, ObjectId},
    render::{RenderSink, render_object},
};
use crate::{
    math::{Pose, Transform, compose},
    tf::{TransformStore, normalize_frame_id},
    transport::SubscriptionId,
};

struct NodeState {
    /// Group whose pose is the node's world pose; holds the child.
    root: Object3D,
    initial_pose: Pose,
    latest: Option<Transform>,
    /// Transform received while held, applied on release.
    pending: Option<Transform>,
    held: bool,
    disposed: bool,
}

impl NodeState {
    fn receive(&mut self, transform: &Transform) {
        if self.held {
            self.pending = Some(*transform);
        } else {
            self.apply(transform);
        }
    }

    fn apply(&mut self, transform: &Transform) {
        if self.disposed {
            return;
        }
        self.latest = Some(*transform);
        let world = compose(&self.initial_pose, transform);
        self.root.set_pose(&world);
        self.root.set_visible(true);
    }
}

pub struct AnchoredNodeOptions {
    pub frame_id: Option<String>,
    pub store: Option<Rc<dyn TransformStore>>,
    pub child: Object3D,
    pub initial_pose: Pose,
}

impl AnchoredNodeOptions {
    pub fn new(child: Object3D) -> Self {
        Self {
            frame_id: None,
            store: None,
            child,
            initial_pose: Pose::IDENTITY,
        }
    }

    pub fn frame(mut self, frame_id: impl Into<String>, store: Rc<dyn TransformStore>) -> Self {
        self.frame_id = Some(frame_id.into());
        self.store = Some(store);
        self
    }

    pub fn pose(mut self, pose: Pose) -> Self {
        self.initial_pose = pose;
        self
    }
}

/// Owns one child renderable and keeps it posed in its frame.
///
/// The world pose is always recomputed from the stored initial pose and the
/// latest transform, so re-delivering a transform never compounds.
pub struct AnchoredNode {
    frame_id: String,
    state: Rc<RefCell<NodeState>>,
    store: Option<Rc<dyn TransformStore>>,
    subscription: Option<SubscriptionId>,
    disposals: Rc<Cell<u32>>,
    /// Transform delivered while the state was borrowed; applied on the next
    /// refresh, release or render.
    deferred: Rc<Cell<Option<Transform>>>,
}

impl AnchoredNode {
    pub fn new(options: AnchoredNodeOptions) -> Self {
        let AnchoredNodeOptions {
            frame_id,
            store,
            child,
            initial_pose,
        } = options;
        let frame_id = frame_id
            .map(|f| normalize_frame_id(&f).to_owned())
            .unwrap_or_default();

        let mut root = Object3D::group(format!("node:{frame_id}")).with_child(child);
        let anchored = store.is_some() && !frame_id.is_empty();
        if anchored {
            root.set_visible(false);
        } else {
            root.set_pose(&initial_pose);
        }

        let state = Rc::new(RefCell::new(NodeState {
            root,
            initial_pose,
            latest: None,
            pending: None,
            held: false,
            disposed: false,
        }));

        let deferred = Rc::new(Cell::new(None));
        let subscription = match (&store, anchored) {
            (Some(store), true) => {
                let weak: Weak<RefCell<NodeState>> = Rc::downgrade(&state);
                let parked = Rc::clone(&deferred);
                Some(store.subscribe(
                    &frame_id,
                    Box::new(move |transform: &Transform| {
                        let Some(state) = weak.upgrade() else {
                            return;
                        };
                        match state.try_borrow_mut() {
                            Ok(mut state) => {
                                parked.set(None);
                                state.receive(transform);
                            }
                            Err(_) => parked.set(Some(*transform)),
                        }
                    }),
                ))
            }
            _ => None,
        };

        Self {
            frame_id,
            state,
            store: if anchored { store } else { None },
            subscription,
            disposals: Rc::new(Cell::new(0)),
            deferred,
        }
    }

    fn take_deferred(&self, state: &mut NodeState) {
        if let Some(transform) = self.deferred.take() {
            state.receive(&transform);
        }
    }

    /// A node posed directly in the fixed frame, visible immediately.
    pub fn unanchored(child: Object3D, pose: Pose) -> Self {
        Self::new(AnchoredNodeOptions::new(child).pose(pose))
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn id(&self) -> ObjectId {
        self.state.borrow().root.id()
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            id: self.id(),
            state: Rc::downgrade(&self.state),
            disposals: Rc::clone(&self.disposals),
        }
    }

    /// Re-poses the node from its initial pose and `transform`.
    pub fn apply_transform(&self, transform: &Transform) {
        self.state.borrow_mut().apply(transform);
    }

    /// Replaces the stored local pose. The node does not move until a
    /// transform is applied or [`AnchoredNode::refresh`] is called.
    pub fn set_local_pose(&self, pose: Pose) {
        self.state.borrow_mut().initial_pose = pose;
    }

    pub fn local_pose(&self) -> Pose {
        self.state.borrow().initial_pose
    }

    /// Recomputes the world pose from the local pose and the last received
    /// transform. Unanchored nodes take the local pose as world pose.
    pub fn refresh(&self) {
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return;
        }
        self.take_deferred(&mut state);
        match (self.store.is_some(), state.latest) {
            (_, Some(latest)) => state.apply(&latest),
            (false, None) => {
                let pose = state.initial_pose;
                state.root.set_pose(&pose);
            }
            (true, None) => {}
        }
    }

    /// Stops frame updates from moving the node. The latest transform
    /// received while held is kept and applied by [`AnchoredNode::release`].
    pub fn hold(&self) {
        self.state.borrow_mut().held = true;
    }

    /// Resumes frame updates. Returns true when a held transform was applied.
    pub fn release(&self) -> bool {
        let mut state = self.state.borrow_mut();
        self.take_deferred(&mut state);
        state.held = false;
        match state.pending.take() {
            Some(transform) => {
                state.apply(&transform);
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.state.borrow().held
    }

    pub fn latest_transform(&self) -> Option<Transform> {
        self.state.borrow().latest
    }

    /// The transform from the node's frame to the fixed frame, identity when
    /// unanchored.
    pub fn frame_transform(&self) -> Option<Transform> {
        if self.store.is_none() {
            return Some(Transform::IDENTITY);
        }
        self.latest_transform()
    }

    pub fn world_pose(&self) -> Pose {
        self.state.borrow().root.pose()
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().root.visible
    }

    pub fn with_child<R>(&self, f: impl FnOnce(&Object3D) -> R) -> Option<R> {
        let state = self.state.borrow();
        state.root.children.first().map(f)
    }

    /// Mutable access to the child; the node is flagged for redraw.
    pub fn with_child_mut<R>(&self, f: impl FnOnce(&mut Object3D) -> R) -> Option<R> {
        let mut state = self.state.borrow_mut();
        state.root.mark_dirty();
        state.root.children.first_mut().map(f)
    }

    /// Swaps in a new child, disposing the previous one.
    pub fn replace_child(&self, child: Object3D) {
        let mut state = self.state.borrow_mut();
        for mut old in state.root.children.drain(..) {
            old.dispose();
        }
        state.root.children.push(child);
        state.root.mark_dirty();
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    /// Unsubscribes from the frame, then disposes the subtree.
    pub fn dispose(&mut self) {
        self.disposals.set(self.disposals.get() + 1);
        if let (Some(store), Some(id)) = (&self.store, self.subscription.take()) {
            store.unsubscribe(&self.frame_id, id);
        }
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.root.dispose();
    }

    /// Draws the node at `path` when anything changed since the last pass.
    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return;
        }
        self.take_deferred(&mut state);
        render_object(sink, path, &Pose::IDENTITY, &mut state.root, false);
    }
}

impl Drop for AnchoredNode {
    fn drop(&mut self) {
        if let (Some(store), Some(id)) = (&self.store, self.subscription.take()) {
            store.unsubscribe(&self.frame_id, id);
        }
    }
}

/// Weak observer of a node, used to check identity and teardown.
#[derive(Clone)]
pub struct NodeHandle {
    id: ObjectId,
    state: Weak<RefCell<NodeState>>,
    disposals: Rc<Cell<u32>>,
}

impl NodeHandle {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// True once disposed, or when the node no longer exists.
    pub fn is_disposed(&self) -> bool {
        self.state
            .upgrade()
            .is_none_or(|state| state.borrow().disposed)
    }

    /// How many times `dispose` was called on the node.
    pub fn dispose_count(&self) -> u32 {
        self.disposals.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        logging::Logger,
        scene::resources::Resources,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
    };
    use glam::{DQuat, DVec3};

    fn store() -> Rc<FrameTransformStore> {
        FrameTransformStore::new(FrameTransformStoreConfig::default(), Logger::detached("tf"))
    }

    fn anchored(store: &Rc<FrameTransformStore>, frame: &str, pose: Pose) -> AnchoredNode {
        let store: Rc<dyn TransformStore> = store.clone();
        AnchoredNode::new(
            AnchoredNodeOptions::new(Object3D::group("child"))
                .frame(frame, store)
                .pose(pose),
        )
    }

    #[test]
    fn hidden_until_the_first_transform() {
        let store = store();
        let node = anchored(&store, "laser_frame", Pose::IDENTITY);
        assert!(!node.is_visible());
        store.set_frame_transform("laser_frame", Transform::from_translation(DVec3::X));
        assert!(node.is_visible());
    }

    #[test]
    fn unanchored_nodes_use_the_local_pose_at_once() {
        let pose = Pose::from_position(DVec3::new(0.0, 2.0, 0.0));
        let node = AnchoredNode::unanchored(Object3D::group("child"), pose);
        assert!(node.is_visible());
        assert_eq!(node.world_pose(), pose);
    }

    #[test]
    fn transforms_rebase_instead_of_accumulating() {
        let store = store();
        let node = anchored(&store, "laser_frame", Pose::IDENTITY);
        store.set_frame_transform("laser_frame", Transform::from_translation(DVec3::X));
        assert!(node.world_pose().position.abs_diff_eq(DVec3::X, 1e-12));
        store.set_frame_transform(
            "laser_frame",
            Transform::from_translation(DVec3::new(2.0, 0.0, 0.0)),
        );
        assert!(
            node.world_pose()
                .position
                .abs_diff_eq(DVec3::new(2.0, 0.0, 0.0), 1e-12)
        );
    }

    #[test]
    fn repeated_delivery_is_a_no_op() {
        let local = Pose::new(DVec3::new(0.5, -0.25, 1.0), DQuat::from_rotation_y(0.3));
        let transform = Transform::new(DVec3::new(1.0, 2.0, 3.0), DQuat::from_rotation_z(1.1));
        let node = AnchoredNode::new(AnchoredNodeOptions::new(Object3D::group("c")).pose(local));
        node.apply_transform(&transform);
        let once = node.world_pose();
        for _ in 0..10_000 {
            node.apply_transform(&transform);
        }
        let many = node.world_pose();
        assert_eq!(once.position.to_array(), many.position.to_array());
        assert_eq!(once.orientation.to_array(), many.orientation.to_array());
    }

    #[test]
    fn local_pose_changes_wait_for_refresh() {
        let store = store();
        let node = anchored(&store, "odom", Pose::IDENTITY);
        store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        node.set_local_pose(Pose::from_position(DVec3::Y));
        assert!(node.world_pose().position.abs_diff_eq(DVec3::X, 1e-12));
        node.refresh();
        assert!(
            node.world_pose()
                .position
                .abs_diff_eq(DVec3::new(1.0, 1.0, 0.0), 1e-12)
        );
    }

    #[test]
    fn dispose_unsubscribes_and_is_idempotent() {
        let store = store();
        let resources = Resources::new();
        let child = crate::scene::shapes::arrow(
            &resources,
            crate::scene::object::ArrowShape::default(),
            [1.0, 0.0, 0.0, 1.0],
        );
        let dyn_store: Rc<dyn TransformStore> = store.clone();
        let mut node = AnchoredNode::new(AnchoredNodeOptions::new(child).frame("odom", dyn_store));
        let handle = node.handle();
        assert_eq!(store.subscriber_count(), 1);

        node.dispose();
        node.dispose();
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(resources.live_count(), 0);
        assert!(handle.is_disposed());
        assert_eq!(handle.dispose_count(), 2);

        store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        assert!(!node.is_visible());
    }

    #[test]
    fn held_nodes_apply_only_the_last_transform_on_release() {
        let store = store();
        let node = anchored(&store, "odom", Pose::IDENTITY);
        store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        node.hold();
        for x in [2.0, 3.0, 4.0] {
            store.set_frame_transform("odom", Transform::from_translation(DVec3::new(x, 0.0, 0.0)));
        }
        assert!(node.world_pose().position.abs_diff_eq(DVec3::X, 1e-12));
        assert!(node.release());
        assert!(
            node.world_pose()
                .position
                .abs_diff_eq(DVec3::new(4.0, 0.0, 0.0), 1e-12)
        );
        assert!(!node.release());
    }

    #[test]
    fn transforms_arriving_mid_borrow_are_parked() {
        let store = store();
        let node = anchored(&store, "odom", Pose::IDENTITY);
        node.with_child_mut(|_| {
            store.set_frame_transform("odom", Transform::from_translation(DVec3::X));
        });
        assert!(!node.is_visible());

        let mut sink = crate::scene::RecordingSink::default();
        node.render("odom", &mut sink);
        assert!(node.is_visible());
        assert!(node.world_pose().position.abs_diff_eq(DVec3::X, 1e-12));
    }

    #[test]
    fn dropping_a_node_releases_its_subscription() {
        let store = store();
        let node = anchored(&store, "odom", Pose::IDENTITY);
        let handle = node.handle();
        drop(node);
        assert_eq!(store.subscriber_count(), 0);
        assert!(handle.is_disposed());
    }
}
