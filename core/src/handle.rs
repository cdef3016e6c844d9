//! Abstract object handles.
//!
//! Every handle is a 64-bit opaque value. For most backends the value is the
//! native handle itself (a `VkImage`, a COM pointer); OpenGL encodes a target,
//! an object name and view flags into it. Callers must never interpret the
//! bits; the owning backend resolves them through its registry.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle.
            pub const NULL: Self = Self(0);

            /// Returns `true` if this is the null handle.
            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Returns the raw 64-bit value.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_handle!(
    /// Buffer or texture.
    Resource
);
define_handle!(
    /// View onto a subrange of a resource.
    ResourceView
);
define_handle!(
    /// Compiled pipeline state.
    Pipeline
);
define_handle!(
    /// Sampler state.
    Sampler
);
define_handle!(
    /// Pipeline layout (descriptor set layouts plus push constants).
    PipelineLayout
);
define_handle!(
    /// Descriptor set layout.
    DescriptorSetLayout
);
define_handle!(
    /// Descriptor set.
    DescriptorSet
);
define_handle!(
    /// Command recording context (command buffer, device context, GL context).
    CommandList
);
define_handle!(
    /// Submission queue.
    CommandQueue
);
define_handle!(
    /// Presentation swap chain.
    SwapChain
);

impl ResourceView {
    /// Reinterprets a resource handle as a view handle.
    ///
    /// Used by backends without first-class view objects where a view that
    /// covers the whole resource is the resource itself.
    pub fn from_resource(resource: Resource) -> Self {
        Self(resource.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(Resource::NULL.is_null());
        assert!(ResourceView::default().is_null());
        assert!(!Pipeline(1).is_null());
    }

    #[test]
    fn test_view_from_resource() {
        let resource = Resource(0xdead_beef);
        assert_eq!(ResourceView::from_resource(resource).raw(), 0xdead_beef);
    }
}
