use std::{collections::HashMap, fmt, sync::Arc};

use futures::future::try_join_all;
use serde_json::Value;

use crate::{
    AsyncDescriptorSource, AsyncRoute, BitmapHandle, CompositeAsyncLoader, CompositeLoader,
    DirLoader, DirectImageLoader, FileLoader, ImageLoader, ImageLoaderConfig, LoaderConfig,
    LoaderContext, MergeLoader, Pollable, ResourceConfig, ResourceError, Result, SourceConfig,
    SpritesheetImageLoader, SyncDescriptorSource,
};

/// A named registry entry and the capabilities it offers.
#[derive(Clone)]
pub struct Loader {
    name: String,
    sync_source: Option<Arc<dyn SyncDescriptorSource>>,
    async_source: Option<Arc<dyn AsyncDescriptorSource>>,
    images: Option<Arc<dyn ImageLoader>>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("sync", &self.sync_source.is_some())
            .field("async", &self.async_source.is_some())
            .field("images", &self.images.is_some())
            .finish()
    }
}

impl Loader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sync_source: None,
            async_source: None,
            images: None,
        }
    }

    /// A loader answering both ways from the same source.
    pub fn both<S>(name: impl Into<String>, source: Arc<S>) -> Self
    where
        S: SyncDescriptorSource + AsyncDescriptorSource + 'static,
    {
        Self::new(name)
            .with_sync(source.clone())
            .with_async(source)
    }

    pub fn with_sync(mut self, source: Arc<dyn SyncDescriptorSource>) -> Self {
        self.sync_source = Some(source);
        self
    }

    pub fn with_async(mut self, source: Arc<dyn AsyncDescriptorSource>) -> Self {
        self.async_source = Some(source);
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageLoader>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sync_source(&self) -> Result<&Arc<dyn SyncDescriptorSource>> {
        self.sync_source
            .as_ref()
            .ok_or_else(|| ResourceError::MissingCapability {
                loader: self.name.clone(),
                capability: "synchronous",
            })
    }

    pub fn async_source(&self) -> Result<&Arc<dyn AsyncDescriptorSource>> {
        self.async_source
            .as_ref()
            .ok_or_else(|| ResourceError::MissingCapability {
                loader: self.name.clone(),
                capability: "asynchronous",
            })
    }

    pub fn image_loader(&self) -> Result<&Arc<dyn ImageLoader>> {
        self.images
            .as_ref()
            .ok_or_else(|| ResourceError::NoImageLoader(self.name.clone()))
    }
}

pub struct RegistryBuilder {
    ctx: LoaderContext,
    loaders: Vec<Loader>,
}

impl RegistryBuilder {
    pub fn register(mut self, loader: Loader) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn build(self) -> Result<ResourceRegistry> {
        let mut loaders = HashMap::with_capacity(self.loaders.len());
        let mut order = Vec::with_capacity(self.loaders.len());
        for loader in self.loaders {
            let name = loader.name.clone();
            if loaders.insert(name.clone(), loader).is_some() {
                return Err(ResourceError::Config(format!(
                    "loader `{name}` is declared twice"
                )));
            }
            order.push(name);
        }
        Ok(ResourceRegistry {
            ctx: self.ctx,
            loaders,
            order,
        })
    }
}

/// Name keyed loaders, built once at startup and read by the game every frame.
///
/// Lookups by name fail fast: an unknown name or a loader lacking the requested
/// capability is an error at the lookup, not at the first use.
pub struct ResourceRegistry {
    ctx: LoaderContext,
    loaders: HashMap<String, Loader>,
    order: Vec<String>,
}

impl ResourceRegistry {
    pub fn builder(ctx: LoaderContext) -> RegistryBuilder {
        RegistryBuilder {
            ctx,
            loaders: Vec::new(),
        }
    }

    /// Builds the loaders a configuration declares without fetching anything.
    pub fn assemble(config: &ResourceConfig, ctx: LoaderContext) -> Result<Self> {
        config.validate()?;
        let images: HashMap<&str, Arc<dyn ImageLoader>> = config
            .images
            .iter()
            .map(|(name, images)| (name.as_str(), build_images(images, &ctx)))
            .collect();

        let mut builder = Self::builder(ctx.clone());
        for loader in &config.loaders {
            let mut built = build_loader(loader, &ctx);
            if let Some(name) = &loader.images {
                let images = images.get(name.as_str()).ok_or_else(|| {
                    ResourceError::Config(format!("unknown image loader `{name}`"))
                })?;
                built = built.with_images(Arc::clone(images));
            }
            builder = builder.register(built);
        }
        builder.build()
    }

    /// Builds the registry and loads every eager loader.
    pub async fn from_config(config: &ResourceConfig, ctx: LoaderContext) -> Result<Self> {
        let registry = Self::assemble(config, ctx)?;
        registry.load().await?;
        Ok(registry)
    }

    /// Runs `load` on every loader with synchronous access, concurrently.
    pub async fn load(&self) -> Result<()> {
        let eager: Vec<_> = self
            .order
            .iter()
            .filter_map(|name| self.loaders.get(name))
            .filter_map(|loader| loader.sync_source.as_ref())
            .collect();
        log::info!("loading {} eager resource loaders", eager.len());
        try_join_all(eager.iter().map(|source| source.load())).await?;
        log::info!("resource registry ready ({} loaders)", self.order.len());
        Ok(())
    }

    pub fn context(&self) -> &LoaderContext {
        &self.ctx
    }

    /// Loader names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    fn lookup(&self, name: &str) -> Result<&Loader> {
        self.loaders
            .get(name)
            .ok_or_else(|| ResourceError::UnknownLoader(name.to_string()))
    }

    /// A loader with synchronous descriptor access.
    pub fn get_loader(&self, name: &str) -> Result<&Loader> {
        let loader = self.lookup(name)?;
        loader.sync_source()?;
        Ok(loader)
    }

    /// A loader with lazy descriptor access.
    pub fn get_async_loader(&self, name: &str) -> Result<&Loader> {
        let loader = self.lookup(name)?;
        loader.async_source()?;
        Ok(loader)
    }

    pub fn load_desc(&self, loader: &Loader, path: &str) -> Result<Option<Value>> {
        loader.sync_source()?.load_desc(path)
    }

    pub fn load_desc_async(&self, loader: &Loader, path: &str) -> Result<Pollable<Option<Value>>> {
        loader.async_source()?.load_desc_async(path)
    }

    /// Serializes a looked up fragment for consumers with their own JSON parser. An
    /// absent node is `null`.
    pub fn as_jsonstring(value: Option<&Value>) -> String {
        value.map_or_else(|| Value::Null.to_string(), Value::to_string)
    }

    pub fn load_image(&self, loader: &Loader, id: &str) -> Result<BitmapHandle> {
        Ok(loader.image_loader()?.load_image(id))
    }

    pub fn get_image_loader(&self, loader: &Loader) -> Result<Arc<dyn ImageLoader>> {
        loader.image_loader().map(Arc::clone)
    }

    pub fn is_ready<T: Send + Sync + 'static>(pollable: &Pollable<T>) -> bool {
        pollable.is_ready()
    }

    pub fn get_result<T: Send + Sync + 'static>(pollable: &Pollable<T>) -> Option<&T> {
        pollable.get_result()
    }
}

fn build_images(config: &ImageLoaderConfig, ctx: &LoaderContext) -> Arc<dyn ImageLoader> {
    match config {
        ImageLoaderConfig::Bid { root } => Arc::new(DirectImageLoader::by_id(root, ctx.clone())),
        ImageLoaderConfig::Path { root } => {
            Arc::new(SpritesheetImageLoader::new(root, ctx.clone()))
        }
    }
}

fn build_loader(config: &LoaderConfig, ctx: &LoaderContext) -> Loader {
    let name = config.name.as_str();
    match &config.source {
        SourceConfig::File { url } => {
            Loader::both(name, Arc::new(FileLoader::new(url, ctx.clone())))
        }
        SourceConfig::Dir { root } => {
            Loader::new(name).with_async(Arc::new(DirLoader::new(root, ctx.clone())))
        }
        SourceConfig::Composite { routes } => {
            let routes = routes
                .iter()
                .map(|route| {
                    let file: Arc<dyn SyncDescriptorSource> =
                        Arc::new(FileLoader::new(&route.url, ctx.clone()));
                    (route.prefix.clone(), file)
                })
                .collect();
            Loader::new(name).with_sync(Arc::new(CompositeLoader::new(routes)))
        }
        SourceConfig::CompositeAsync { routes } => {
            let routes = routes
                .iter()
                .map(|route| {
                    let child: Arc<dyn AsyncDescriptorSource> = match route {
                        AsyncRoute::Dir { root, .. } => {
                            Arc::new(DirLoader::new(root, ctx.clone()))
                        }
                        AsyncRoute::File { url, .. } => {
                            Arc::new(FileLoader::new(url, ctx.clone()))
                        }
                    };
                    (route.prefix().to_string(), child)
                })
                .collect();
            Loader::new(name).with_async(Arc::new(CompositeAsyncLoader::new(routes)))
        }
        SourceConfig::Merge { base, mappings } => Loader::both(
            name,
            Arc::new(MergeLoader::new(base, mappings.clone(), ctx.clone())),
        ),
    }
}
