/// Media uploads for profile images.
///
/// Incoming files are first written to a local `StagingArea`, then handed to
/// a `MediaHost` which forwards them to the CDN and reports the public URL.
pub mod cloudinary;
pub mod staging;

use std::path::Path;

use futures_util::future::BoxFuture;

pub use cloudinary::{CloudinaryConfig, CloudinaryUploader};
pub use staging::StagingArea;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
}

/// An external object store that turns a local file into a public URL.
///
/// A single best-effort attempt: `None` means the provider did not produce a
/// URL, and the local file has already been removed.
pub trait MediaHost: Send + Sync {
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, Option<UploadedMedia>>;
}
