use std::{fmt, str::FromStr};

use anyhow::{Context, Result};
use resource::{BitmapHandle, Pollable, ResourceRegistry};
use serde_json::Value;

/// `loader:path` as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub loader: String,
    pub path: String,
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (loader, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected `loader:path`, got `{s}`"))?;
        if loader.is_empty() {
            return Err(format!("missing loader name in `{s}`"));
        }
        Ok(Target {
            loader: loader.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.loader, self.path)
    }
}

enum Pending {
    Desc(Pollable<Option<Value>>),
    Image(BitmapHandle),
}

/// One resource the frame loop polls until it settles.
pub struct Probe {
    target: Target,
    pending: Pending,
    reported: bool,
}

impl Probe {
    /// Looks the descriptor up through the loader's lazy access if it has one,
    /// otherwise reads the eagerly loaded tree.
    pub fn desc(registry: &ResourceRegistry, target: Target) -> Result<Self> {
        let pollable = match registry.get_async_loader(&target.loader) {
            Ok(loader) => registry.load_desc_async(loader, &target.path),
            Err(_) => {
                let loader = registry.get_loader(&target.loader)?;
                registry.load_desc(loader, &target.path).map(Pollable::ready)
            }
        }
        .with_context(|| format!("descriptor probe {target}"))?;
        Ok(Self::new(target, Pending::Desc(pollable)))
    }

    pub fn image(registry: &ResourceRegistry, target: Target) -> Result<Self> {
        let loader = registry
            .get_async_loader(&target.loader)
            .or_else(|_| registry.get_loader(&target.loader))?;
        let handle = registry
            .load_image(loader, &target.path)
            .with_context(|| format!("image probe {target}"))?;
        Ok(Self::new(target, Pending::Image(handle)))
    }

    fn new(target: Target, pending: Pending) -> Self {
        Self {
            target,
            pending,
            reported: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        match &self.pending {
            Pending::Desc(pollable) => pollable.is_settled(),
            Pending::Image(handle) => !handle.loading(),
        }
    }

    /// Logs the outcome the first time the probe is seen settled. Returns whether it
    /// reported on this call.
    pub fn poll(&mut self, frame: u64) -> bool {
        if self.reported || !self.is_settled() {
            return false;
        }
        self.reported = true;
        match &self.pending {
            Pending::Desc(pollable) => match pollable.error() {
                Some(err) => log::warn!("[frame {}] {} failed: {}", frame, self.target, err),
                None => log::info!(
                    "[frame {}] {} = {}",
                    frame,
                    self.target,
                    ResourceRegistry::as_jsonstring(pollable.get_result().and_then(Option::as_ref))
                ),
            },
            Pending::Image(handle) => match handle.error() {
                Some(err) => log::warn!("[frame {}] {} failed: {}", frame, self.target, err),
                None => log::info!(
                    "[frame {}] {} is {}x{}",
                    frame,
                    self.target,
                    handle.width().unwrap_or_default(),
                    handle.height().unwrap_or_default()
                ),
            },
        }
        true
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}
