//! `nav_msgs/OccupancyGrid` as a textured plane.

use std::{cell::RefCell, rc::Rc};

use glam::DVec3;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    logging::Logger,
    math::Pose,
    msgs::{self, nav_msgs::OccupancyGrid},
    scene::{
        AnchoredNode, AnchoredNodeOptions, Material, MaterialKind, Object3D, ObjectKind,
        RenderSink, Resources, object::Grid,
    },
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

/// Gray level of an unknown (`-1`) cell.
pub const UNKNOWN_GRAY: u8 = 127;

/// Gray level for one cell: free is white, occupied black, unknown mid gray.
pub fn cell_gray(value: i8) -> u8 {
    if value < 0 {
        return UNKNOWN_GRAY;
    }
    let occupancy = value.min(100) as u32;
    (255 - occupancy * 255 / 100) as u8
}

/// Converts cells into row-major RGBA texels, tinted by `tint`.
pub fn texels(grid: &OccupancyGrid, tint: [f32; 4]) -> Vec<[u8; 4]> {
    let alpha = (tint[3].clamp(0.0, 1.0) * 255.0).round() as u8;
    let cells = grid.info.width as usize * grid.info.height as usize;
    (0..cells)
        .map(|i| {
            let gray = grid.data.get(i).copied().map_or(UNKNOWN_GRAY, cell_gray) as f32;
            let channel = |c: f32| (gray * c.clamp(0.0, 1.0)).round() as u8;
            [channel(tint[0]), channel(tint[1]), channel(tint[2]), alpha]
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OccupancyGridConfig {
    pub topic: String,
    /// Keep listening after the first map.
    pub continuous: bool,
    pub color: [f32; 4],
}

impl Default for OccupancyGridConfig {
    fn default() -> Self {
        Self {
            topic: "/map".to_owned(),
            continuous: true,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

struct GridState {
    config: OccupancyGridConfig,
    store: Rc<dyn TransformStore>,
    resources: Resources,
    transport: Rc<dyn Transport>,
    subscription: Option<SubscriptionId>,
    node: Option<AnchoredNode>,
    log: Logger,
}

impl GridState {
    fn process(&mut self, grid: &OccupancyGrid) {
        let info = &grid.info;
        let resolution = info.resolution as f64;
        if info.width == 0 || info.height == 0 || resolution <= 0.0 {
            self.log.warn(format_args!(
                "ignoring empty map {}x{} at {resolution}",
                info.width, info.height
            ));
            return;
        }
        if grid.data.len() != info.width as usize * info.height as usize {
            self.log.warn(format_args!(
                "map has {} cells, expected {}x{}",
                grid.data.len(),
                info.width,
                info.height
            ));
        }

        let material = Material::new(&self.resources, MaterialKind::Basic, self.config.color);
        let plane = Object3D::new(
            "map",
            ObjectKind::Grid(Grid::new(
                &self.resources,
                info.width,
                info.height,
                resolution,
                texels(grid, self.config.color),
                material,
            )),
        )
        // The plane is centered; shift it so cell (0, 0) sits on the origin.
        .with_pose(&Pose::from_position(DVec3::new(
            info.width as f64 * resolution / 2.0,
            info.height as f64 * resolution / 2.0,
            0.0,
        )));

        if let Some(mut old) = self.node.take() {
            old.dispose();
        }
        self.node = Some(AnchoredNode::new(
            AnchoredNodeOptions::new(plane)
                .frame(&grid.header.frame_id, Rc::clone(&self.store))
                .pose(info.origin.into()),
        ));

        if !self.config.continuous {
            if let Some(id) = self.subscription.take() {
                self.transport.unsubscribe(id);
            }
        }
    }
}

/// Keeps the latest map on screen.
pub struct OccupancyGridClient {
    state: Rc<RefCell<GridState>>,
}

impl OccupancyGridClient {
    pub fn new(
        config: OccupancyGridConfig,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let topic = TopicSpec::new(&config.topic, "nav_msgs/OccupancyGrid");
        let state = Rc::new(RefCell::new(GridState {
            config,
            store,
            resources,
            transport: Rc::clone(&transport),
            subscription: None,
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
                match msgs::from_value::<OccupancyGrid>(message) {
                    Ok(grid) => state.process(&grid),
                    Err(err) => state.log.warn(format_args!("skipping map: {err}")),
                }
            }),
        );
        state.borrow_mut().subscription = Some(subscription);
        Self { state }
    }

    pub fn process(&self, grid: &OccupancyGrid) {
        self.state.borrow_mut().process(grid);
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.borrow().subscription.is_some()
    }

    pub fn with_grid<R>(&self, f: impl FnOnce(&Grid) -> R) -> Option<R> {
        let state = self.state.borrow();
        state.node.as_ref()?.with_child(|child| match &child.kind {
            ObjectKind::Grid(grid) => Some(f(grid)),
            _ => None,
        })?
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        if let Some(node) = &self.state.borrow().node {
            node.render(path, sink);
        }
    }

    pub fn dispose(&mut self) {
        let mut state = self.state.borrow_mut();
        if let Some(id) = state.subscription.take() {
            state.transport.unsubscribe(id);
        }
        if let Some(mut node) = state.node.take() {
            node.dispose();
        }
    }
}

impl Drop for OccupancyGridClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        msgs::nav_msgs::MapMetaData,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
        transport::LoopbackTransport,
    };

    fn grid(data: Vec<i8>, width: u32, height: u32) -> OccupancyGrid {
        let mut grid = OccupancyGrid {
            info: MapMetaData {
                resolution: 0.5,
                width,
                height,
                ..Default::default()
            },
            data,
            ..Default::default()
        };
        grid.header.frame_id = "map".into();
        grid
    }

    #[test]
    fn cell_values_map_to_gray_levels() {
        assert_eq!(cell_gray(-1), 127);
        assert_eq!(cell_gray(0), 255);
        assert_eq!(cell_gray(100), 0);
        assert_eq!(cell_gray(50), 128);
        assert_eq!(cell_gray(120), 0);
    }

    #[test]
    fn missing_cells_read_as_unknown() {
        let texels = texels(&grid(vec![0], 2, 1), [1.0; 4]);
        assert_eq!(texels, vec![[255, 255, 255, 255], [127, 127, 127, 255]]);
    }

    #[test]
    fn one_shot_client_unsubscribes_after_the_first_map() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let client = OccupancyGridClient::new(
            OccupancyGridConfig {
                continuous: false,
                ..Default::default()
            },
            transport.clone(),
            store,
            resources.clone(),
            Logger::detached("map"),
        );
        transport.inject("/map", serde_json::to_value(grid(vec![0, 100, -1, 50], 2, 2)).unwrap());
        transport.dispatch_pending();

        assert!(!client.is_subscribed());
        assert_eq!(transport.subscriber_count("/map"), 0);
        assert_eq!(client.with_grid(|g| (g.width, g.height)), Some((2, 2)));
        drop(client);
        assert_eq!(resources.live_count(), 0);
    }

    #[test]
    fn new_maps_replace_the_old_one() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let client = OccupancyGridClient::new(
            OccupancyGridConfig::default(),
            transport,
            store,
            resources.clone(),
            Logger::detached("map"),
        );
        client.process(&grid(vec![0; 4], 2, 2));
        let live = resources.live_count();
        client.process(&grid(vec![0; 9], 3, 3));
        assert_eq!(resources.live_count(), live);
        assert_eq!(client.with_grid(|g| g.texels.len()), Some(9));
    }
}
