//! Marker visualization: per-marker renderables, the keyed set that owns
//! them, and the topic clients that feed it.

pub mod client;
pub mod manager;
pub mod marker;

pub use client::{
    MarkerArrayClient, MarkerClient, MarkerClientConfig, MarkerSource, MarkerTopicClient,
    MarkersChanged,
};
pub use manager::{MarkerEvent, MarkerKey, MarkerSetConfig, MarkerSetManager};
pub use marker::{MarkerView, build_object};
