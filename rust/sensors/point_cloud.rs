//! `sensor_msgs/PointCloud2` decoding.
//!
//! Binary and base64 payloads take the same path: base64 is decoded to bytes
//! first, then every record is located with one stride formula
//! (`row * row_step + column * point_step`).

use std::{borrow::Cow, cell::RefCell, rc::Rc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::Value;

use super::{
    buffer::StreamingPointBuffer,
    colormap::{self, ColorMap},
    points::{PointsConfig, PointsLayer},
};
use crate::{
    error::{Error, Result},
    logging::Logger,
    msgs::{
        self,
        sensor_msgs::{PointCloud2, PointData, PointField, point_field},
    },
    scene::{RenderSink, Resources},
    tf::TransformStore,
    transport::{SubscriptionId, TopicSpec, Transport},
};

/// Size in bytes of a PointField datatype.
pub fn datatype_size(datatype: u8) -> Option<usize> {
    match datatype {
        point_field::INT8 | point_field::UINT8 => Some(1),
        point_field::INT16 | point_field::UINT16 => Some(2),
        point_field::INT32 | point_field::UINT32 | point_field::FLOAT32 => Some(4),
        point_field::FLOAT64 => Some(8),
        _ => None,
    }
}

/// Raw payload bytes, decoding base64 when needed.
pub fn payload_bytes(data: &PointData) -> Result<Cow<'_, [u8]>> {
    match data {
        PointData::Binary(bytes) => Ok(Cow::Borrowed(bytes)),
        PointData::Base64(text) => Ok(Cow::Owned(STANDARD.decode(text)?)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldReader {
    offset: usize,
    datatype: u8,
    size: usize,
}

impl FieldReader {
    fn new(field: &PointField, point_step: usize) -> Result<Self> {
        let size = datatype_size(field.datatype).ok_or_else(|| {
            Error::decode(
                format!("field {}", field.name),
                format!("unsupported datatype {}", field.datatype),
            )
        })?;
        let offset = field.offset as usize;
        if offset + size > point_step {
            return Err(Error::decode(
                format!("field {}", field.name),
                format!("offset {offset} does not fit in point_step {point_step}"),
            ));
        }
        Ok(Self {
            offset,
            datatype: field.datatype,
            size,
        })
    }

    fn raw<'a>(&self, record: &'a [u8]) -> Option<&'a [u8]> {
        record.get(self.offset..self.offset + self.size)
    }

    fn read(&self, record: &[u8], big_endian: bool) -> Option<f64> {
        let bytes = self.raw(record)?;
        macro_rules! scalar {
            ($ty:ty) => {{
                let bytes = bytes.try_into().ok()?;
                if big_endian {
                    <$ty>::from_be_bytes(bytes) as f64
                } else {
                    <$ty>::from_le_bytes(bytes) as f64
                }
            }};
        }
        Some(match self.datatype {
            point_field::INT8 => scalar!(i8),
            point_field::UINT8 => scalar!(u8),
            point_field::INT16 => scalar!(i16),
            point_field::UINT16 => scalar!(u16),
            point_field::INT32 => scalar!(i32),
            point_field::UINT32 => scalar!(u32),
            point_field::FLOAT32 => scalar!(f32),
            point_field::FLOAT64 => scalar!(f64),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColorField {
    /// Float32 whose bytes hold packed RGBA.
    Packed(FieldReader),
    Scalar(FieldReader),
}

/// Byte layout of one cloud: where x, y, z and the color live in a record.
#[derive(Debug, Clone, PartialEq)]
pub struct PointLayout {
    x: FieldReader,
    y: FieldReader,
    z: FieldReader,
    color: Option<ColorField>,
    point_step: usize,
    row_step: usize,
    width: usize,
    height: usize,
    big_endian: bool,
}

impl PointLayout {
    pub fn new(cloud: &PointCloud2, color_source: Option<&str>) -> Result<Self> {
        let point_step = cloud.point_step as usize;
        if point_step == 0 {
            return Err(Error::decode("point cloud", "point_step is 0"));
        }
        let axis = |name: &str| {
            let field = cloud
                .field(name)
                .ok_or_else(|| Error::decode("point cloud", format!("missing field {name}")))?;
            FieldReader::new(field, point_step)
        };
        let color = match color_source.and_then(|name| cloud.field(name)) {
            Some(field) => {
                let reader = FieldReader::new(field, point_step)?;
                let packed = matches!(field.name.as_str(), "rgb" | "rgba")
                    && field.datatype == point_field::FLOAT32;
                Some(if packed {
                    ColorField::Packed(reader)
                } else {
                    ColorField::Scalar(reader)
                })
            }
            None => None,
        };
        let width = cloud.width as usize;
        // A zero row_step shows up in hand-built messages; treat rows as packed.
        let row_step = match cloud.row_step as usize {
            0 => width * point_step,
            step => step,
        };
        Ok(Self {
            x: axis("x")?,
            y: axis("y")?,
            z: axis("z")?,
            color,
            point_step,
            row_step,
            width,
            height: cloud.height as usize,
            big_endian: cloud.is_bigendian,
        })
    }

    pub fn has_color(&self) -> bool {
        self.color.is_some()
    }

    pub fn num_records(&self) -> usize {
        self.width * self.height
    }

    /// Byte offset of record `index`, the one formula both encodings share.
    pub fn record_offset(&self, index: usize) -> Option<usize> {
        if self.width == 0 || index >= self.num_records() {
            return None;
        }
        let row = index / self.width;
        let column = index % self.width;
        Some(row * self.row_step + column * self.point_step)
    }

    fn record<'a>(&self, data: &'a [u8], index: usize) -> Option<&'a [u8]> {
        let start = self.record_offset(index)?;
        data.get(start..start + self.point_step)
    }
}

/// Decodes clouds into a point buffer.
pub struct PointCloudDecoder {
    point_ratio: usize,
    color_source: Option<String>,
    color_min: f32,
    color_max: f32,
    colormap: ColorMap,
}

impl PointCloudDecoder {
    pub fn new(point_ratio: usize) -> Self {
        Self {
            point_ratio: point_ratio.max(1),
            color_source: None,
            color_min: 0.0,
            color_max: 1.0,
            colormap: colormap::turbo(),
        }
    }

    pub fn with_color_source(mut self, field: impl Into<String>, min: f32, max: f32) -> Self {
        self.color_source = Some(field.into());
        self.color_min = min;
        self.color_max = max;
        self
    }

    pub fn with_colormap(mut self, colormap: ColorMap) -> Self {
        self.colormap = colormap;
        self
    }

    pub fn layout(&self, cloud: &PointCloud2) -> Result<PointLayout> {
        PointLayout::new(cloud, self.color_source.as_deref())
    }

    /// Writes at most `buffer.capacity()` points; returns how many were
    /// written. Records with a non-finite coordinate are skipped, and a
    /// payload shorter than the header announces ends the message early.
    pub fn decode(&self, cloud: &PointCloud2, buffer: &mut StreamingPointBuffer) -> Result<usize> {
        let layout = self.layout(cloud)?;
        let data = payload_bytes(&cloud.data)?;

        buffer.begin();
        for index in (0..layout.num_records()).step_by(self.point_ratio) {
            let Some(record) = layout.record(&data, index) else {
                break;
            };
            let be = layout.big_endian;
            let (Some(x), Some(y), Some(z)) = (
                layout.x.read(record, be),
                layout.y.read(record, be),
                layout.z.read(record, be),
            ) else {
                continue;
            };
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                continue;
            }
            let color = match (&layout.color, buffer.has_colors()) {
                (Some(field), true) => self.color(field, record, be),
                _ => None,
            };
            if !buffer.push([x as f32, y as f32, z as f32], color) {
                break;
            }
        }
        Ok(buffer.finish())
    }

    fn color(&self, field: &ColorField, record: &[u8], big_endian: bool) -> Option<[f32; 3]> {
        match field {
            ColorField::Packed(reader) => {
                let bytes: [u8; 4] = reader.raw(record)?.try_into().ok()?;
                let [r, g, b, _] = colormap::unpack_rgba(bytes, big_endian);
                Some([r, g, b])
            }
            ColorField::Scalar(reader) => {
                let value = reader.read(record, big_endian)? as f32;
                Some((self.colormap)(colormap::normalize(
                    value,
                    self.color_min,
                    self.color_max,
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointCloud2Config {
    pub topic: String,
    pub throttle_rate_ms: u32,
    #[serde(flatten)]
    pub points: PointsConfig,
}

impl Default for PointCloud2Config {
    fn default() -> Self {
        Self {
            topic: "/points".to_owned(),
            throttle_rate_ms: 0,
            points: PointsConfig::default(),
        }
    }
}

struct PointCloudState {
    layer: PointsLayer,
    decoder: PointCloudDecoder,
    log: Logger,
}

impl PointCloudState {
    fn process(&mut self, cloud: &PointCloud2) -> Result<Option<usize>> {
        if !self.layer.accept_message() {
            return Ok(None);
        }
        if !self.layer.is_setup() {
            let layout = self.decoder.layout(cloud)?;
            if !self.layer.setup(&cloud.header.frame_id, layout.has_color()) {
                return Ok(None);
            }
        }
        self.layer
            .with_buffer(|buffer| self.decoder.decode(cloud, buffer))
            .transpose()
    }
}

/// Subscribes to a `sensor_msgs/PointCloud2` topic.
pub struct PointCloud2Client {
    transport: Rc<dyn Transport>,
    subscription: Option<SubscriptionId>,
    state: Rc<RefCell<PointCloudState>>,
}

impl PointCloud2Client {
    pub fn new(
        config: PointCloud2Config,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TransformStore>,
        resources: Resources,
        log: Logger,
    ) -> Self {
        let mut decoder = PointCloudDecoder::new(config.points.point_ratio);
        if let Some(field) = &config.points.color_source {
            decoder =
                decoder.with_color_source(field, config.points.color_min, config.points.color_max);
        }
        let state = Rc::new(RefCell::new(PointCloudState {
            layer: PointsLayer::new(config.points, resources, Some(store), log.child("points")),
            decoder,
            log,
        }));

        let weak = Rc::downgrade(&state);
        let topic = TopicSpec::new(&config.topic, "sensor_msgs/PointCloud2")
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
                let result = msgs::from_value::<PointCloud2>(message)
                    .and_then(|cloud| state.process(&cloud));
                if let Err(err) = result {
                    state.log.warn(format_args!("skipping point cloud: {err}"));
                }
            }),
        );

        Self {
            transport,
            subscription: Some(subscription),
            state,
        }
    }

    /// Feeds a cloud directly, bypassing the transport.
    pub fn process(&self, cloud: &PointCloud2) -> Result<Option<usize>> {
        self.state.borrow_mut().process(cloud)
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

impl Drop for PointCloud2Client {
    fn drop(&mut self) {
        self.dispose();
    }
}
