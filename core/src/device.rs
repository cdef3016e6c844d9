//! The abstract device interface add-ons program against.
//!
//! Every backend device implements [`DeviceApi`]. Add-ons receive it with
//! every event and use it to create their own objects and to query what the
//! layer knows about the application's objects.

use crate::descriptor::{DescriptorSetRecord, DescriptorSetUpdate};
use crate::error::{ApiError, ApiResult};
use crate::format::Format;
use crate::handle::{
    DescriptorSet, DescriptorSetLayout, Pipeline, PipelineLayout, Resource, ResourceView, Sampler,
};
use crate::pipeline::{DescriptorSetLayoutDesc, PipelineDesc, PipelineLayoutDesc};
use crate::resource::{ResourceDesc, ResourceUsage, ResourceViewDesc, SubresourceData};
use crate::sampler::SamplerDesc;

/// Graphics API a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    D3D9,
    D3D10,
    D3D11,
    D3D12,
    OpenGL,
    Vulkan,
}

impl GraphicsApi {
    /// Returns `true` for the COM based APIs whose objects the layer wraps in proxies.
    pub fn is_com(self) -> bool {
        matches!(
            self,
            GraphicsApi::D3D9 | GraphicsApi::D3D10 | GraphicsApi::D3D11 | GraphicsApi::D3D12
        )
    }
}

/// Optional device capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCaps {
    ComputeShader,
    GeometryShader,
    HullAndDomainShader,
    LogicOp,
    DualSourceBlend,
    IndependentBlend,
    FillModeNonSolid,
    MultiViewport,
    PartialPushConstantUpdates,
    DrawInstanced,
    DrawOrDispatchIndirect,
    CopyBufferRegion,
    CopyBufferToTexture,
    Blit,
    ResolveRegion,
    SamplerCompare,
    SamplerAnisotropic,
    SamplerWithResourceView,
    SharedResource,
    DescriptorSets,
}

/// Device operations and queries available to add-ons.
///
/// Creation methods return an error without registering anything when the
/// native call fails, so a failed call leaves no trace in the device's
/// registries.
pub trait DeviceApi: Send + Sync {
    /// API this device belongs to.
    fn api(&self) -> GraphicsApi;

    /// Native device handle.
    fn native(&self) -> u64;

    fn check_capability(&self, capability: DeviceCaps) -> bool;

    /// Returns `true` if `format` can be used for every usage in `usage`.
    fn check_format_support(&self, format: Format, usage: ResourceUsage) -> bool;

    fn create_sampler(&self, desc: &SamplerDesc) -> ApiResult<Sampler>;
    fn destroy_sampler(&self, sampler: Sampler);

    /// Create a resource, uploading `initial_data` (one entry per
    /// subresource) and leaving it in `initial_state`.
    fn create_resource(
        &self,
        desc: &ResourceDesc,
        initial_data: Option<&[SubresourceData<'_>]>,
        initial_state: ResourceUsage,
    ) -> ApiResult<Resource>;
    fn destroy_resource(&self, resource: Resource);

    /// Create a view of `resource` for `usage_type` (one of the view usages).
    fn create_resource_view(
        &self,
        resource: Resource,
        usage_type: ResourceUsage,
        desc: &ResourceViewDesc,
    ) -> ApiResult<ResourceView>;
    fn destroy_resource_view(&self, view: ResourceView);

    fn create_pipeline(&self, desc: &PipelineDesc) -> ApiResult<Pipeline>;
    fn destroy_pipeline(&self, pipeline: Pipeline);

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> ApiResult<PipelineLayout> {
        let _ = desc;
        Err(ApiError::Unsupported("pipeline layouts".into()))
    }
    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        let _ = layout;
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> ApiResult<DescriptorSetLayout> {
        let _ = desc;
        Err(ApiError::Unsupported("descriptor set layouts".into()))
    }
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        let _ = layout;
    }

    fn create_descriptor_sets(
        &self,
        layout: DescriptorSetLayout,
        count: u32,
    ) -> ApiResult<Vec<DescriptorSet>> {
        let _ = (layout, count);
        Err(ApiError::Unsupported("descriptor sets".into()))
    }
    fn destroy_descriptor_sets(&self, sets: &[DescriptorSet]) {
        let _ = sets;
    }
    fn update_descriptor_sets(&self, updates: &[DescriptorSetUpdate]) -> ApiResult<()> {
        let _ = updates;
        Err(ApiError::Unsupported("descriptor sets".into()))
    }

    /// Current contents of a descriptor set.
    fn get_descriptor_set(&self, set: DescriptorSet) -> Option<DescriptorSetRecord> {
        let _ = set;
        None
    }

    /// Creation descriptor of a resource, if the resource is known.
    fn get_resource_desc(&self, resource: Resource) -> Option<ResourceDesc>;

    /// Resource a view was created for, if the view is known.
    ///
    /// The link is weak: the resource may already have been destroyed.
    fn get_resource_from_view(&self, view: ResourceView) -> Option<Resource>;

    /// View descriptor, if the view is known.
    fn get_resource_view_desc(&self, view: ResourceView) -> Option<ResourceViewDesc>;

    fn is_resource_handle_valid(&self, resource: Resource) -> bool;
    fn is_resource_view_handle_valid(&self, view: ResourceView) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::d3d9(GraphicsApi::D3D9, true)]
    #[case::d3d10(GraphicsApi::D3D10, true)]
    #[case::d3d11(GraphicsApi::D3D11, true)]
    #[case::d3d12(GraphicsApi::D3D12, true)]
    #[case::vulkan(GraphicsApi::Vulkan, false)]
    #[case::opengl(GraphicsApi::OpenGL, false)]
    fn test_com_apis(#[case] api: GraphicsApi, #[case] com: bool) {
        assert_eq!(api.is_com(), com);
    }
}
