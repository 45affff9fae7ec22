//! Navigation layers: paths, poses, polygons and odometry.
//!
//! Each layer turns one message into one renderable in the message's frame.
//! The client owning the layer replaces its node on every accepted message,
//! disposing the previous one first.

pub mod odometry;
pub mod path;
pub mod polygon;
pub mod pose;
pub mod pose_array;

use std::{cell::RefCell, rc::Rc};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    logging::Logger,
    msgs,
    scene::{AnchoredNode, AnchoredNodeOptions, Object3D, RenderSink, Resources, Rgba},
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

pub use odometry::{OdometryConfig, OdometryLayer};
pub use path::{PathConfig, PathLayer};
pub use polygon::{PolygonConfig, PolygonLayer};
pub use pose::{PoseConfig, PoseLayer};
pub use pose_array::{PoseArrayConfig, PoseArrayLayer};

/// The purple the navigation layers default to.
pub const DEFAULT_COLOR: Rgba = [0.8, 0.0, 1.0, 1.0];

/// A renderable built for one message.
pub struct Built {
    pub frame_id: String,
    pub object: Object3D,
}

/// Converts messages of one type into renderables.
pub trait NavLayer: 'static {
    type Message: DeserializeOwned;

    fn topic(&self) -> &str;
    fn message_type(&self) -> &'static str;

    /// Builds the renderable for `message`, or `None` to keep the current one.
    fn build(&mut self, message: &Self::Message, resources: &Resources) -> Option<Built>;
}

struct NavState<L: NavLayer> {
    layer: L,
    store: Rc<dyn TransformStore>,
    resources: Resources,
    node: Option<AnchoredNode>,
    log: Logger,
}

impl<L: NavLayer> NavState<L> {
    fn process(&mut self, message: &L::Message) -> bool {
        let Some(built) = self.layer.build(message, &self.resources) else {
            return false;
        };
        if let Some(mut old) = self.node.take() {
            old.dispose();
        }
        self.node = Some(AnchoredNode::new(
            AnchoredNodeOptions::new(built.object).frame(built.frame_id, Rc::clone(&self.store)),
        ));
        true
    }
}

/// Subscribes a [`NavLayer`] to its topic.
pub struct NavClient<L: NavLayer> {
    transport: Rc<dyn Transport>,
    subscription: Option<SubscriptionId>,
    state: Rc<RefCell<NavState<L>>>,
}

pub type PathClient = NavClient<PathLayer>;
pub type PoseArrayClient = NavClient<PoseArrayLayer>;
pub type PoseClient = NavClient<PoseLayer>;
pub type PolygonClient = NavClient<PolygonLayer>;
pub type OdometryClient = NavClient<OdometryLayer>;

impl<L: NavLayer> NavClient<L> {
    pub fn new(
        layer: L,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let topic = TopicSpec::new(layer.topic(), layer.message_type());
        let state = Rc::new(RefCell::new(NavState {
            layer,
            store,
            resources,
            node: None,
            log,
        }));

        let weak = Rc::downgrade(&state);
        let subscription = transport.subscribe(
            &topic,
            Box::new(move |message: &Value| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let Ok(mut state) = state.try_borrow_mut() else {
                    return;
                };
                match msgs::from_value::<L::Message>(message) {
                    Ok(message) => {
                        state.process(&message);
                    }
                    Err(err) => state.log.warn(format_args!("skipping message: {err}")),
                }
            }),
        );

        Self {
            transport,
            subscription: Some(subscription),
            state,
        }
    }

    /// Feeds a message directly. Returns whether the node was rebuilt.
    pub fn process(&self, message: &L::Message) -> bool {
        self.state.borrow_mut().process(message)
    }

    pub fn with_node<R>(&self, f: impl FnOnce(&AnchoredNode) -> R) -> Option<R> {
        self.state.borrow().node.as_ref().map(f)
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        if let Some(node) = &self.state.borrow().node {
            node.render(path, sink);
        }
    }

    pub fn dispose(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.transport.unsubscribe(id);
        }
        if let Some(mut node) = self.state.borrow_mut().node.take() {
            node.dispose();
        }
    }
}

impl<L: NavLayer> Drop for NavClient<L> {
    fn drop(&mut self) {
        self.dispose();
    }
}
