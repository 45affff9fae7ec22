use clap::Parser as _;
use edgefirst_scene::{
    Args,
    bridge::{self, TF_MESSAGE_TYPE, TF_STATIC_TOPIC, TF_TOPIC},
    frames::request_frame_list,
    layout::{FRAMES_SERVICE, Layout, Scene},
    logging::LogRegistry,
};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    error::Error,
    rc::Rc,
    time::{Duration, Instant},
};
use zenoh::config::Config;

/// How long to listen for transforms.
const LISTEN: Duration = Duration::from_secs(5);

fn print_tree(
    frame: &str,
    children: &BTreeMap<String, Vec<String>>,
    depth: usize,
) {
    println!("{}{frame}", "  ".repeat(depth));
    for child in children.get(frame).into_iter().flatten() {
        print_tree(child, children, depth + 1);
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
    let mut layout = Layout::default();
    if let Some(frame) = &args.fixed_frame {
        layout.tf.fixed_frame = frame.clone();
    }
    let scene = Scene::new(layout, &registry);

    let session = zenoh::open(Config::try_from(args.clone())?).await?;
    let tf = session
        .declare_subscriber(bridge::key_expr(TF_TOPIC).as_str())
        .await?;
    let tf_static = session
        .declare_subscriber(bridge::key_expr(TF_STATIC_TOPIC).as_str())
        .await?;

    let deadline = tokio::time::Instant::now() + LISTEN;
    loop {
        let (topic, msg) = tokio::select! {
            msg = tf.recv_async() => (TF_TOPIC, msg),
            msg = tf_static.recv_async() => (TF_STATIC_TOPIC, msg),
            _ = tokio::time::sleep_until(deadline) => break,
        };
        let Ok(msg) = msg else {
            break;
        };
        let encoding = msg.encoding().to_string();
        match bridge::decode(TF_MESSAGE_TYPE, &encoding, &msg.payload().to_bytes()) {
            Ok(message) => scene.deliver(topic, message),
            Err(e) => {
                eprintln!("Failed to decode transforms: {e}");
                continue; // skip this message and continue
            }
        }
        scene.tick(Instant::now());
    }

    let frames = Rc::new(RefCell::new(Vec::new()));
    let done = frames.clone();
    request_frame_list(
        scene.transport().as_ref(),
        FRAMES_SERVICE,
        vec![scene.store().fixed_frame().to_owned()],
        registry.channel("frames"),
        move |list| *done.borrow_mut() = list,
    );
    scene.tick(Instant::now());

    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut roots = Vec::new();
    for frame in frames.borrow().iter() {
        match scene.store().parent(frame) {
            Some(parent) => children.entry(parent).or_default().push(frame.clone()),
            None => roots.push(frame.clone()),
        }
    }
    for root in roots {
        print_tree(&root, &children, 0);
    }

    Ok(())
}
