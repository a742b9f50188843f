use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use resource::{LoaderContext, ResourceConfig, ResourceEvent, ResourceRegistry};
use tokio::{runtime::Handle, time::MissedTickBehavior};

use crate::{
    frame_timer::FrameTimer,
    probe::{Probe, Target},
};

/// Loads a resource registry and polls descriptors and images from a frame loop that
/// never waits on a fetch.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Registry description.
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/resources.toml"))]
    pub config: PathBuf,

    /// Frame budget; the loop stops earlier once every probe has settled.
    #[arg(long, default_value_t = 600)]
    pub frames: u64,

    #[arg(long, default_value_t = 16)]
    pub frame_ms: u64,

    /// Descriptor lookup, e.g. `mapx:Map1/100000000/info/bgm`. Repeatable.
    #[arg(long = "desc", value_name = "LOADER:PATH")]
    pub descs: Vec<Target>,

    /// Image lookup, e.g. `tile:Map/Tile/woodMarble.img/bsc/0`. Repeatable.
    #[arg(long = "image", value_name = "LOADER:ID")]
    pub images: Vec<Target>,
}

pub struct App {
    registry: ResourceRegistry,
    events: Receiver<ResourceEvent>,
    probes: Vec<Probe>,
    timer: FrameTimer,
    frame_budget: u64,
    frame: Duration,
}

impl App {
    pub async fn new(args: Args) -> Result<Self> {
        let config = ResourceConfig::from_path(&args.config)
            .with_context(|| format!("loading {:?}", args.config))?;
        let (sender, events) = crossbeam_channel::unbounded();
        let ctx = LoaderContext::new(config.fetcher.build()?, Handle::current())
            .with_cache_policy(config.cache)
            .with_event_sender(sender);

        let registry = ResourceRegistry::from_config(&config, ctx)
            .await
            .context("bootstrapping the resource registry")?;
        log::info!(
            "registry: {}",
            registry.names().collect::<Vec<_>>().join(", ")
        );

        let mut probes = Vec::with_capacity(args.descs.len() + args.images.len());
        for target in args.descs {
            probes.push(Probe::desc(&registry, target)?);
        }
        for target in args.images {
            probes.push(Probe::image(&registry, target)?);
        }

        let frame = Duration::from_millis(args.frame_ms.max(1));
        Ok(Self {
            registry,
            events,
            probes,
            timer: FrameTimer::new(frame * 4),
            frame_budget: args.frames,
            frame,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut ticks = tokio::time::interval(self.frame);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.timer.frames() < self.frame_budget {
            ticks.tick().await;
            self.timer.tick();
            self.update();

            if self.probes.iter().all(Probe::is_settled) {
                log::info!("all probes settled after {} frames", self.timer.frames());
                return Ok(());
            }
        }

        for probe in self.probes.iter().filter(|p| !p.is_settled()) {
            log::warn!("{} still loading after {} frames", probe.target(), self.frame_budget);
        }
        Ok(())
    }

    fn update(&mut self) {
        let frame = self.timer.frames();
        for probe in &mut self.probes {
            probe.poll(frame);
        }

        for event in self.events.try_iter() {
            match event {
                ResourceEvent::Loaded { url } => log::debug!("loaded {}", url),
                ResourceEvent::FetchFailed { url, error } => {
                    log::warn!("fetch of {} failed: {}", url, error)
                }
                ResourceEvent::AtlasDecomposed { atlas, regions } => {
                    log::info!("atlas {} has {} regions", atlas, regions)
                }
            }
        }

        if frame % 60 == 0 {
            log::debug!(
                "frame {} ({} fps, {:?} delta), {} loaders",
                frame,
                self.timer.fps(),
                self.timer.delta(),
                self.registry.names().count()
            );
        }
    }
}
