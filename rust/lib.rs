//! Frame-anchored 3D scene of a live robot.
//!
//! Sensor, navigation and marker topics are turned into renderable objects
//! attached to the robot's coordinate frames. Every object follows its frame
//! as transforms arrive, and a render pass hands the scene to a
//! [`scene::RenderSink`].

pub mod bridge;
pub mod error;
pub mod events;
pub mod frames;
pub mod interactive;
pub mod layout;
pub mod logging;
pub mod markers;
pub mod math;
pub mod msgs;
pub mod nav;
pub mod octree;
#[cfg(feature = "rerun")]
pub mod rerun_sink;
pub mod scene;
pub mod sensors;
pub mod tf;
pub mod transport;

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use serde_json::json;
use zenoh::config::{Config, WhatAmI};

use crate::error::Error;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Rerun parameters
    #[cfg(feature = "rerun")]
    #[command(flatten)]
    pub rerun: rerun::clap::RerunArgs,

    /// JSON layout listing the displays to show
    #[arg(long)]
    pub layout: Option<PathBuf>,

    /// frame every display is expressed in, overrides the layout's
    #[arg(long)]
    pub fixed_frame: Option<String>,

    /// minimum level for the scene's log channels
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// zenoh connection mode
    #[arg(long, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(short, long)]
    remote: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(short, long)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long)]
    no_multicast_scouting: bool,
}

impl Args {
    /// The layout file if one was given, otherwise every default display.
    pub fn load_layout(&self) -> Result<layout::Layout, Error> {
        let mut layout = match &self.layout {
            Some(path) => layout::Layout::load(path)?,
            None => layout::Layout::with_defaults("world"),
        };
        if let Some(frame) = &self.fixed_frame {
            layout.tf.fixed_frame = frame.clone();
        }
        Ok(layout)
    }
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self, Error> {
        let mut config = Config::default();
        let mut insert = |key: &str, value: serde_json::Value| {
            config
                .insert_json5(key, &value.to_string())
                .map_err(|e| Error::Config(format!("zenoh {key}: {e}")))
        };

        insert("mode", json!(args.mode))?;

        if !args.remote.is_empty() {
            insert("connect/endpoints", json!(args.remote))?;
        }

        if !args.listen.is_empty() {
            insert("listen/endpoints", json!(args.listen))?;
        }

        if args.no_multicast_scouting {
            insert("scouting/multicast/enabled", json!(false))?;
        }

        insert("scouting/multicast/interface", json!("lo"))?;

        Ok(config)
    }
}
