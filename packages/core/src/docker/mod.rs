//! Docker operations
//!
//! - Client wrapper with connection handling
//! - Error types with daemon-availability classification
//! - Image build from the generated context, tagging and push
//! - Test container lifecycle, exec and log tail
//! - Registry credential checks
//! - Progress reporting for builds and pushes
//!
//! The pipeline talks to Docker only through the `ImageRuntime` trait.

mod client;
pub mod container;
mod error;
pub mod exec;
pub mod image;
pub mod progress;
pub mod reference;
pub mod registry;
mod runtime;

pub use client::DockerClient;
pub use error::DockerError;
pub use image::image_labels;
pub use progress::{ProgressMode, ProgressReporter};
pub use reference::{ImageReference, LATEST_TAG, image_references, resolve_namespace};
pub use registry::{AuthChallenge, parse_www_authenticate};
pub use runtime::{BuildRequest, ContainerStatus, ExecOutput, HEALTHY, ImageRuntime};
