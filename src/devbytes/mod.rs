//! The DevBytes playlist: wire types, pipeline, HTTP source, and repository.

pub mod api_types;
pub mod cache;
pub mod pipeline;
pub mod remote;
pub mod repository;
pub mod types;

pub use api_types::{NetworkVideo, NetworkVideoContainer};
pub use cache::DevBytesKey;
pub use pipeline::{smart_truncate, to_domain, to_persisted};
pub use remote::HttpVideoSource;
pub use repository::{open_repository, VideoObserver, VideosRepository};
pub use types::{PersistedVideo, Video};
