//! Laser scans rendered as planar point sets.

use std::{cell::RefCell, rc::Rc};

use serde::Deserialize;
use serde_json::Value;

use super::{
    buffer::StreamingPointBuffer,
    colormap::{self, ColorMap},
    points::{PointsConfig, PointsLayer},
};
use crate::{
    logging::Logger,
    msgs::{self, sensor_msgs::LaserScan},
    scene::{RenderSink, Resources},
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

/// Turns range samples into points in the scan frame.
pub struct LaserScanDecoder {
    point_ratio: usize,
    color_min: f32,
    color_max: f32,
    colormap: ColorMap,
}

impl LaserScanDecoder {
    pub fn new(point_ratio: usize) -> Self {
        Self {
            point_ratio: point_ratio.max(1),
            color_min: 0.0,
            color_max: 1.0,
            colormap: colormap::turbo(),
        }
    }

    /// Intensity range mapped onto the colormap.
    pub fn with_intensity_range(mut self, min: f32, max: f32) -> Self {
        self.color_min = min;
        self.color_max = max;
        self
    }

    pub fn with_colormap(mut self, colormap: ColorMap) -> Self {
        self.colormap = colormap;
        self
    }

    /// Writes every in-range sample, densely packed, and returns the number
    /// of points written. Out-of-range and non-finite samples are skipped.
    pub fn decode(&self, scan: &LaserScan, buffer: &mut StreamingPointBuffer) -> usize {
        buffer.begin();
        let with_colors = buffer.has_colors() && !scan.intensities.is_empty();
        for i in (0..scan.ranges.len()).step_by(self.point_ratio) {
            let range = scan.ranges[i];
            if !(scan.range_min <= range && range <= scan.range_max) {
                continue;
            }
            let angle = scan.angle_min + i as f32 * scan.angle_increment;
            let color = with_colors
                .then(|| scan.intensities.get(i))
                .flatten()
                .map(|intensity| {
                    (self.colormap)(colormap::normalize(
                        *intensity,
                        self.color_min,
                        self.color_max,
                    ))
                });
            if !buffer.push([range * angle.cos(), range * angle.sin(), 0.0], color) {
                break;
            }
        }
        buffer.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaserScanConfig {
    pub topic: String,
    pub throttle_rate_ms: u32,
    #[serde(flatten)]
    pub points: PointsConfig,
}

impl Default for LaserScanConfig {
    fn default() -> Self {
        Self {
            topic: "/scan".to_owned(),
            throttle_rate_ms: 0,
            points: PointsConfig::default(),
        }
    }
}

struct LaserScanState {
    layer: PointsLayer,
    decoder: LaserScanDecoder,
    log: Logger,
}

impl LaserScanState {
    fn process(&mut self, scan: &LaserScan) -> Option<usize> {
        if !self.layer.accept_message() {
            return None;
        }
        let with_colors = self.layer.config().color_source.as_deref() == Some("intensities")
            && !scan.intensities.is_empty();
        if !self.layer.setup(&scan.header.frame_id, with_colors) {
            return None;
        }
        let written = self.layer.with_buffer(|buffer| self.decoder.decode(scan, buffer));
        if let Some(written) = written {
            self.log.debug(format_args!(
                "scan in {}: {written}/{} points",
                scan.header.frame_id,
                scan.ranges.len()
            ));
        }
        written
    }
}

/// Subscribes to a `sensor_msgs/LaserScan` topic and keeps one point layer
/// up to date.
pub struct LaserScanClient {
    transport: Rc<dyn Transport>,
    subscription: Option<SubscriptionId>,
    state: Rc<RefCell<LaserScanState>>,
}

impl LaserScanClient {
    pub fn new(
        config: LaserScanConfig,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let decoder = LaserScanDecoder::new(config.points.point_ratio)
            .with_intensity_range(config.points.color_min, config.points.color_max);
        let state = Rc::new(RefCell::new(LaserScanState {
            layer: PointsLayer::new(config.points, resources, Some(store), log.child("points")),
            decoder,
            log: log.clone(),
        }));

        let weak = Rc::downgrade(&state);
        let topic = TopicSpec::new(&config.topic, "sensor_msgs/LaserScan")
            .with_throttle_rate(config.throttle_rate_ms);
        let subscription = transport.subscribe(
            &topic,
            Box::new(move |message: &Value| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let Ok(mut state) = state.try_borrow_mut() else {
                    return;
                };
                match msgs::from_value::<LaserScan>(message) {
                    Ok(scan) => {
                        state.process(&scan);
                    }
                    Err(err) => state.log.warn(format_args!("skipping laser scan: {err}")),
                }
            }),
        );

        Self {
            transport,
            subscription: Some(subscription),
            state,
        }
    }

    /// Feeds a scan directly, bypassing the transport.
    pub fn process(&self, scan: &LaserScan) -> Option<usize> {
        self.state.borrow_mut().process(scan)
    }

    pub fn draw_count(&self) -> usize {
        self.state
            .borrow()
            .layer
            .with_buffer(|buffer| buffer.draw_count())
            .unwrap_or(0)
    }

    pub fn render(&self, path: &str, sink: &mut dyn RenderSink) {
        self.state.borrow().layer.render(path, sink);
    }

    pub fn dispose(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.transport.unsubscribe(id);
        }
        self.state.borrow_mut().layer.dispose();
    }
}

impl Drop for LaserScanClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::Transform,
        tf::{FrameTransformStore, FrameTransformStoreConfig},
        transport::LoopbackTransport,
    };
    use glam::DVec3;
    use std::f32::consts::FRAC_PI_2;

    fn scan(ranges: Vec<f32>) -> LaserScan {
        let mut scan = LaserScan {
            angle_min: 0.0,
            angle_increment: FRAC_PI_2,
            range_min: 0.1,
            range_max: 10.0,
            ranges,
            ..Default::default()
        };
        scan.header.frame_id = "laser_frame".into();
        scan
    }

    #[test]
    fn out_of_range_samples_are_skipped() {
        let scan = scan(vec![0.09, 5.0, 10.01]);
        let mut buffer = StreamingPointBuffer::new(16, false);
        assert_eq!(LaserScanDecoder::new(1).decode(&scan, &mut buffer), 1);
        let [x, y, z] = buffer.position(0).unwrap_or_default();
        assert!(x.abs() < 1e-5);
        assert!((y - 5.0).abs() < 1e-5);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn nan_ranges_never_pass_the_bounds_check() {
        let scan = scan(vec![f32::NAN, 1.0, f32::INFINITY]);
        let mut buffer = StreamingPointBuffer::new(16, false);
        assert_eq!(LaserScanDecoder::new(1).decode(&scan, &mut buffer), 1);
    }

    #[test]
    fn point_ratio_keeps_sample_angles() {
        let scan = scan(vec![1.0, 1.0, 1.0, 1.0]);
        let mut buffer = StreamingPointBuffer::new(16, false);
        assert_eq!(LaserScanDecoder::new(2).decode(&scan, &mut buffer), 2);
        // sample 2 sits at pi
        let [x, y, _] = buffer.position(1).unwrap_or_default();
        assert!((x + 1.0).abs() < 1e-5 && y.abs() < 1e-5);
    }

    #[test]
    fn intensities_color_the_points() {
        let mut scan = scan(vec![1.0, 2.0]);
        scan.intensities = vec![0.0, 100.0];
        let mut buffer = StreamingPointBuffer::new(4, true);
        let decoder = LaserScanDecoder::new(1)
            .with_intensity_range(0.0, 100.0)
            .with_colormap(colormap::grayscale());
        decoder.decode(&scan, &mut buffer);
        assert_eq!(buffer.color(0), Some([0.0; 3]));
        assert_eq!(buffer.color(1), Some([1.0; 3]));
    }

    #[test]
    fn client_sets_up_on_first_scan() {
        let transport = LoopbackTransport::new(Logger::detached("transport"));
        let store = FrameTransformStore::new(
            FrameTransformStoreConfig::default(),
            Logger::detached("tf"),
        );
        let resources = Resources::new();
        let mut client = LaserScanClient::new(
            LaserScanConfig::default(),
            transport.clone(),
            store.clone(),
            resources.clone(),
            Logger::detached("scan"),
        );
        assert_eq!(resources.live_count(), 0);

        let message = serde_json::to_value(scan(vec![1.0, 2.0, 3.0])).unwrap();
        transport.inject("/scan", message);
        transport.dispatch_pending();
        assert_eq!(client.draw_count(), 3);
        assert!(resources.live_count() > 0);

        store.set_frame_transform("laser_frame", Transform::from_translation(DVec3::X));
        let mut sink = crate::scene::RecordingSink::default();
        client.render("scan", &mut sink);
        assert!(!sink.drawn.is_empty());

        client.dispose();
        assert_eq!(transport.subscriber_count("/scan"), 0);
        assert_eq!(resources.live_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
    }
}
