pub mod client;
pub mod error;
pub mod normalize;
pub mod overrides;
pub mod params;
pub mod pipeline;
pub mod progress;
pub mod venice;

pub use client::{ClientSettings, GenerationClient};
pub use error::GenerationError;
pub use normalize::GeneratedImage;
pub use pipeline::generate_image;
pub use progress::{ProgressEvent, ProgressReporter};
pub use venice::VeniceBackend;
