//! A scene assembled from a layout file: one transform store, one loopback
//! transport and the display clients listed in the layout.

use std::{fs, path::Path, rc::Rc, time::Instant};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    bridge::{TF_MESSAGE_TYPE, TF_STATIC_TOPIC, TF_TOPIC},
    error::{Error, Result},
    interactive::{InteractiveMarkerClient, InteractiveMarkerConfig},
    logging::{LogRegistry, Logger},
    markers::{MarkerArrayClient, MarkerClient, MarkerClientConfig},
    msgs::{self, tf2_msgs::TFMessage},
    nav::{
        NavClient, OdometryConfig, OdometryLayer, PathConfig, PathLayer, PolygonConfig,
        PolygonLayer, PoseArrayConfig, PoseArrayLayer, PoseConfig, PoseLayer,
    },
    octree::{OctomapConfig, OctomapLayer},
    scene::{RenderSink, Resources},
    sensors::{
        LaserScanClient, LaserScanConfig, OccupancyGridClient, OccupancyGridConfig,
        PointCloud2Client, PointCloud2Config,
    },
    tf::{FrameTransformStore, FrameTransformStoreConfig, TransformStore},
    transport::{LoopbackTransport, SubscriptionId, TopicSpec, Transport},
};

/// Service answering with the frames the transform store knows about.
pub const FRAMES_SERVICE: &str = "/tf2_frames";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub tf: FrameTransformStoreConfig,
    pub laser_scans: Vec<LaserScanConfig>,
    pub point_clouds: Vec<PointCloud2Config>,
    pub occupancy_grids: Vec<OccupancyGridConfig>,
    pub markers: Vec<MarkerClientConfig>,
    pub marker_arrays: Vec<MarkerClientConfig>,
    pub interactive_markers: Vec<InteractiveMarkerConfig>,
    pub paths: Vec<PathConfig>,
    pub poses: Vec<PoseConfig>,
    pub pose_arrays: Vec<PoseArrayConfig>,
    pub polygons: Vec<PolygonConfig>,
    pub odometry: Vec<OdometryConfig>,
    pub octomaps: Vec<OctomapConfig>,
}

impl Layout {
    /// Reads a JSON layout file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid layout {}: {e}", path.display())))
    }

    /// A layout showing every default topic.
    pub fn with_defaults(fixed_frame: &str) -> Self {
        Self {
            tf: FrameTransformStoreConfig {
                fixed_frame: fixed_frame.to_owned(),
                ..Default::default()
            },
            laser_scans: vec![LaserScanConfig::default()],
            point_clouds: vec![PointCloud2Config::default()],
            occupancy_grids: vec![OccupancyGridConfig::default()],
            marker_arrays: vec![MarkerClientConfig::default()],
            interactive_markers: vec![InteractiveMarkerConfig::default()],
            ..Default::default()
        }
    }
}

enum Display {
    LaserScan(LaserScanClient),
    PointCloud(PointCloud2Client),
    OccupancyGrid(OccupancyGridClient),
    Markers(MarkerClient),
    MarkerArray(MarkerArrayClient),
    Path(NavClient<PathLayer>),
    Pose(NavClient<PoseLayer>),
    PoseArray(NavClient<PoseArrayLayer>),
    Polygon(NavClient<PolygonLayer>),
    Odometry(NavClient<OdometryLayer>),
    Octomap(NavClient<OctomapLayer>),
}

impl Display {
    fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        match self {
            Self::LaserScan(c) => c.render(path, sink),
            Self::PointCloud(c) => c.render(path, sink),
            Self::OccupancyGrid(c) => c.render(path, sink),
            Self::Markers(c) => c.render(path, sink),
            Self::MarkerArray(c) => c.render(path, sink),
            Self::Path(c) => c.render(path, sink),
            Self::Pose(c) => c.render(path, sink),
            Self::PoseArray(c) => c.render(path, sink),
            Self::Polygon(c) => c.render(path, sink),
            Self::Odometry(c) => c.render(path, sink),
            Self::Octomap(c) => c.render(path, sink),
        }
    }

    fn sweep(&self, now: Instant) -> usize {
        match self {
            Self::Markers(c) => c.sweep(now),
            Self::MarkerArray(c) => c.sweep(now),
            _ => 0,
        }
    }

    fn dispose(&mut self) {
        match self {
            Self::LaserScan(c) => c.dispose(),
            Self::PointCloud(c) => c.dispose(),
            Self::OccupancyGrid(c) => c.dispose(),
            Self::Markers(c) => c.dispose(),
            Self::MarkerArray(c) => c.dispose(),
            Self::Path(c) => c.dispose(),
            Self::Pose(c) => c.dispose(),
            Self::PoseArray(c) => c.dispose(),
            Self::Polygon(c) => c.dispose(),
            Self::Odometry(c) => c.dispose(),
            Self::Octomap(c) => c.dispose(),
        }
    }
}

/// Every display of a layout, fed through one loopback transport.
///
/// Incoming messages are queued with [`Scene::deliver`] and take effect on
/// the next [`Scene::tick`].
pub struct Scene {
    transport: Rc<LoopbackTransport>,
    store: Rc<FrameTransformStore>,
    resources: Resources,
    displays: Vec<(String, Display)>,
    interactive: Vec<(String, InteractiveMarkerClient)>,
    tf_subscriptions: Vec<SubscriptionId>,
    log: Logger,
}

impl Scene {
    pub fn new(layout: Layout, registry: &Rc<LogRegistry>) -> Self {
        let log = registry.channel("scene");
        let transport = LoopbackTransport::new(registry.channel("transport"));
        let store = FrameTransformStore::new(layout.tf, registry.channel("tf"));
        let resources = Resources::new();

        let tf_subscriptions = [TF_TOPIC, TF_STATIC_TOPIC]
            .into_iter()
            .map(|topic| {
                let weak = Rc::downgrade(&store);
                let log = log.clone();
                transport.subscribe(
                    &TopicSpec::new(topic, TF_MESSAGE_TYPE),
                    Box::new(move |message: &Value| {
                        let Some(store) = weak.upgrade() else {
                            return;
                        };
                        match msgs::from_value::<TFMessage>(message) {
                            Ok(message) => store.ingest(&message),
                            Err(err) => log.warn(format_args!("skipping transforms: {err}")),
                        }
                    }),
                )
            })
            .collect();

        let weak = Rc::downgrade(&store);
        transport.advertise_service(FRAMES_SERVICE, move |_| {
            let frames = weak.upgrade().map(|store| store.frames()).unwrap_or_default();
            Ok(json!({ "frames": frames }))
        });

        let dyn_transport: Rc<dyn Transport> = transport.clone();
        let dyn_store: Rc<dyn TransformStore> = store.clone();
        let mut displays = Vec::new();
        for config in layout.laser_scans {
            let name = display_name("scan", &config.topic);
            let client = LaserScanClient::new(
                config,
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(&name),
            );
            displays.push((name, Display::LaserScan(client)));
        }
        for config in layout.point_clouds {
            let name = display_name("cloud", &config.topic);
            let client = PointCloud2Client::new(
                config,
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(&name),
            );
            displays.push((name, Display::PointCloud(client)));
        }
        for config in layout.occupancy_grids {
            let name = display_name("grid", &config.topic);
            let client = OccupancyGridClient::new(
                config,
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(&name),
            );
            displays.push((name, Display::OccupancyGrid(client)));
        }
        for (index, config) in layout.markers.into_iter().enumerate() {
            let name = format!("markers_{index}");
            let client = MarkerClient::new(
                config,
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(&name),
            );
            displays.push((name, Display::Markers(client)));
        }
        for (index, config) in layout.marker_arrays.into_iter().enumerate() {
            let name = format!("marker_array_{index}");
            let client = MarkerArrayClient::new(
                config,
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(&name),
            );
            displays.push((name, Display::MarkerArray(client)));
        }

        let nav = |name: &str| {
            (
                dyn_transport.clone(),
                dyn_store.clone(),
                resources.clone(),
                registry.channel(name),
            )
        };
        for config in layout.paths {
            let name = display_name("path", &config.topic);
            let (t, s, r, l) = nav(&name);
            let client = NavClient::new(PathLayer::new(config), t, s, r, l);
            displays.push((name, Display::Path(client)));
        }
        for config in layout.poses {
            let name = display_name("pose", &config.topic);
            let (t, s, r, l) = nav(&name);
            let client = NavClient::new(PoseLayer::new(config), t, s, r, l);
            displays.push((name, Display::Pose(client)));
        }
        for config in layout.pose_arrays {
            let name = display_name("poses", &config.topic);
            let (t, s, r, l) = nav(&name);
            let client = NavClient::new(PoseArrayLayer::new(config), t, s, r, l);
            displays.push((name, Display::PoseArray(client)));
        }
        for config in layout.polygons {
            let name = display_name("polygon", &config.topic);
            let (t, s, r, l) = nav(&name);
            let client = NavClient::new(PolygonLayer::new(config), t, s, r, l);
            displays.push((name, Display::Polygon(client)));
        }
        for config in layout.odometry {
            let name = display_name("odometry", &config.topic);
            let (t, s, r, l) = nav(&name);
            let client = NavClient::new(OdometryLayer::new(config), t, s, r, l);
            displays.push((name, Display::Odometry(client)));
        }
        for config in layout.octomaps {
            let name = display_name("octomap", &config.topic);
            let (t, s, r, l) = nav(&name);
            let layer = OctomapLayer::new(config, l.child("decode"));
            let client = NavClient::new(layer, t, s, r, l);
            displays.push((name, Display::Octomap(client)));
        }

        let interactive = layout
            .interactive_markers
            .into_iter()
            .map(|config| {
                let name = display_name("interactive", &config.topic);
                let client = InteractiveMarkerClient::new(
                    config,
                    dyn_transport.clone(),
                    dyn_store.clone(),
                    resources.clone(),
                    registry.channel(&name),
                );
                (name, client)
            })
            .collect();

        log.info(format_args!(
            "scene in {} with {} displays",
            store.fixed_frame(),
            displays.len()
        ));

        Self {
            transport,
            store,
            resources,
            displays,
            interactive,
            tf_subscriptions,
            log,
        }
    }

    pub fn transport(&self) -> &Rc<LoopbackTransport> {
        &self.transport
    }

    pub fn store(&self) -> &Rc<FrameTransformStore> {
        &self.store
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Topics the displays listen on, with their declared schemas.
    pub fn topics(&self) -> Vec<TopicSpec> {
        self.transport.topics()
    }

    pub fn interactive(&self, topic: &str) -> Option<&InteractiveMarkerClient> {
        self.interactive
            .iter()
            .find(|(_, client)| client.feedback_topic().starts_with(topic))
            .map(|(_, client)| client)
    }

    /// Queues a message that arrived on `topic`.
    pub fn deliver(&self, topic: &str, message: Value) {
        self.transport.inject(topic, message);
    }

    /// Delivers queued messages, expires timed out markers and re-sends
    /// interactive feedback. Returns how many messages were processed.
    pub fn tick(&self, now: Instant) -> usize {
        let processed = self.transport.dispatch_pending();
        let expired: usize = self.displays.iter().map(|(_, d)| d.sweep(now)).sum();
        if expired > 0 {
            self.log.debug(format_args!("{expired} markers expired"));
        }
        for (_, client) in &self.interactive {
            client.poll(now);
        }
        // feedback published by the interactive clients loops back too
        processed + self.transport.dispatch_pending()
    }

    /// Draws every display under `root/{display}`.
    pub fn render(&self, root: &str, sink: &mut dyn RenderSink) {
        for (name, display) in &self.displays {
            display.render(&format!("{root}/{name}"), sink);
        }
        for (name, client) in &self.interactive {
            client.render(&format!("{root}/{name}"), sink);
        }
    }

    pub fn dispose(&mut self) {
        for (_, display) in &mut self.displays {
            display.dispose();
        }
        for (_, client) in &mut self.interactive {
            client.dispose();
        }
        for id in self.tf_subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// `scan` + `/front/scan` -> `scan_front_scan`.
fn display_name(kind: &str, topic: &str) -> String {
    let cleaned: String = topic
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        kind.to_owned()
    } else {
        format!("{kind}_{cleaned}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn layouts_parse_with_defaults() {
        let layout: Layout = serde_json::from_str(
            r#"{"tf": {"fixed_frame": "map"}, "laser_scans": [{"topic": "/front"}]}"#,
        )
        .unwrap();
        assert_eq!(layout.tf.fixed_frame, "map");
        assert_eq!(layout.laser_scans[0].topic, "/front");
        assert!(layout.markers.is_empty());
    }

    #[test]
    fn display_names_are_path_safe() {
        assert_eq!(display_name("scan", "/front/scan"), "scan_front_scan");
        assert_eq!(display_name("grid", "/"), "grid");
    }

    #[test]
    fn scene_routes_transforms_and_answers_frame_queries() {
        let registry = LogRegistry::new(LevelFilter::Warn);
        let scene = Scene::new(Layout::with_defaults("world"), &registry);
        let names: Vec<String> = scene.topics().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"/tf".to_owned()));
        assert!(names.contains(&"/scan".to_owned()));

        scene.deliver(
            "/tf",
            json!({"transforms": [{
                "header": {"frame_id": "world"},
                "child_frame_id": "base_link",
                "transform": {"translation": {"x": 1.0}, "rotation": {"w": 1.0}}
            }]}),
        );
        scene.tick(Instant::now());
        let base = scene.store().lookup("base_link").unwrap();
        assert!((base.translation.x - 1.0).abs() < 1e-9);

        let frames = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = frames.clone();
        crate::frames::request_frame_list(
            scene.transport().as_ref(),
            FRAMES_SERVICE,
            Vec::new(),
            Logger::detached("frames"),
            move |list| *sink.borrow_mut() = list,
        );
        scene.tick(Instant::now());
        assert!(frames.borrow().contains(&"base_link".to_owned()));
    }
}
