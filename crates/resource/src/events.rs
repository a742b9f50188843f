/// Events published by the loaders when an optional event sender is attached to the
/// [`LoaderContext`](crate::LoaderContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A background fetch completed and its result is cached.
    Loaded { url: String },
    /// A background fetch failed; the next reference to it fetches again.
    FetchFailed { url: String, error: String },
    /// An atlas was split into individually addressable regions.
    AtlasDecomposed { atlas: String, regions: usize },
}
