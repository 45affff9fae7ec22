use clap::Parser as _;
use edgefirst_scene::{
    Args, bridge,
    layout::Scene,
    logging::LogRegistry,
    rerun_sink::RerunSink,
};
use serde_json::Value;
use std::{
    error::Error,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, task};
use zenoh::{
    bytes::Encoding, config::Config, handlers::FifoChannelHandler, pubsub::Subscriber,
    sample::Sample,
};

/// Render passes per second.
const FRAME_RATE: u64 = 30;

struct Incoming {
    topic: String,
    message: Value,
}

async fn forward(
    sub: Subscriber<FifoChannelHandler<Sample>>,
    topic: String,
    message_type: String,
    tx: mpsc::UnboundedSender<Incoming>,
) {
    while let Ok(msg) = sub.recv_async().await {
        let encoding = msg.encoding().to_string();
        let message = match bridge::decode(&message_type, &encoding, &msg.payload().to_bytes()) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping message on {topic}: {e}");
                continue; // skip this message and continue
            }
        };
        let incoming = Incoming {
            topic: topic.clone(),
            message,
        };
        if tx.send(incoming).is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .parse_default_env()
        .init();

    let registry = LogRegistry::new(args.log_level);
    let mut scene = Scene::new(args.load_layout()?, &registry);

    let session = zenoh::open(Config::try_from(args.clone())?).await?;
    let (rr, _serve_guard) = args.rerun.init("scene-viewer")?;
    let mut sink = RerunSink::new(rr, registry.channel("rerun"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    for topic in scene.topics() {
        let key = bridge::key_expr(&topic.name);
        let sub = session.declare_subscriber(key.as_str()).await?;
        log::info!("bridging {key} as {}", topic.message_type);
        task::spawn(forward(sub, topic.name, topic.message_type, tx.clone()));
    }
    drop(tx);

    let mut frames = tokio::time::interval(Duration::from_millis(1000 / FRAME_RATE));
    loop {
        tokio::select! {
            incoming = rx.recv() => {
                let Some(Incoming { topic, message }) = incoming else {
                    break;
                };
                scene.deliver(&topic, message);
            }
            _ = frames.tick() => {
                scene.tick(Instant::now());

                // interactive marker feedback goes back out to the robot
                for (topic, message) in scene.transport().take_published() {
                    let put = session
                        .put(bridge::key_expr(&topic), message.to_string())
                        .encoding(Encoding::APPLICATION_JSON)
                        .await;
                    if let Err(e) = put {
                        log::warn!("failed to publish {topic}: {e}");
                    }
                }

                scene.render("scene", &mut sink);
            }
        }
    }

    scene.dispose();
    Ok(())
}
