mod bitmap;
mod cache;
mod config;
mod context;
mod desc;
mod error;
mod events;
pub mod fetch;
pub mod path;
mod pollable;
mod registry;

pub use bitmap::*;
pub use cache::*;
pub use config::*;
pub use context::*;
pub use desc::*;
pub use error::*;
pub use events::*;
pub use fetch::{Fetcher, FsFetcher, HttpFetcher, MemoryFetcher};
pub use pollable::*;
pub use registry::*;
