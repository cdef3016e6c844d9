//! # Lumen Core
//!
//! Backend-agnostic object model of the Lumen graphics API interception
//! layer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`format`], [`resource`], [`pipeline`], [`sampler`] - the abstract
//!   descriptors every backend translates to and from
//! - [`handle`] - 64-bit abstract object handles
//! - [`registry`] - per-device native handle registries
//! - [`render_pass`] - render pass reconstruction from bind calls
//! - [`descriptor`] - descriptor set bookkeeping
//! - [`events`] and [`device`] - the add-on boundary
//!
//! The backends themselves live in `lumen-graphics`.

pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod handle;
pub mod pipeline;
pub mod registry;
pub mod render_pass;
pub mod resource;
pub mod sampler;

pub use config::LayerConfig;
pub use device::{DeviceApi, DeviceCaps, GraphicsApi};
pub use error::{ApiError, ApiResult, TrackingError};
pub use events::{Addon, AddonRegistry};
pub use format::Format;
pub use handle::{
    CommandList, CommandQueue, DescriptorSet, DescriptorSetLayout, Pipeline, PipelineLayout,
    Resource, ResourceView, Sampler, SwapChain,
};
pub use registry::{HandleRegistry, ObjectTable};
pub use render_pass::{PassTransition, RenderPassAttachments, RenderPassTracker};
pub use resource::{
    MemoryHeap, ResourceDesc, ResourceKind, ResourceType, ResourceUsage, ResourceViewDesc,
    ResourceViewType, SubresourceData, TextureDesc, TextureDimension,
};
pub use sampler::SamplerDesc;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
