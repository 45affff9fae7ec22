//! Interactive markers: pointer-editable poses mirrored from a server.
//!
//! A session owns one marker. Dragging one of its controls moves the local
//! pose and queues feedback; poses and frame updates the server pushes during
//! a drag are parked and reconciled once when the drag ends.

pub mod client;
pub mod control;
pub mod menu;
pub mod session;

pub use client::{InteractiveMarkerClient, InteractiveMarkerConfig, InteractiveMarkersChanged};
pub use control::{Control, DragReference, InteractionMode, OrientationMode};
pub use menu::{Menu, MenuItem};
pub use session::{
    EventResponse, InteractiveEvent, InteractiveMarkerSession, Mailbox, PointerButton,
    PointerEvent, SessionConfig,
};
