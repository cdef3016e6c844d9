//! Abstract handle encoding of OpenGL objects.
//!
//! GL object names are only unique per object type, so an abstract handle
//! carries the target the name belongs to. The 64-bit layout is
//!
//! ```text
//!  63        40 39    32 31             0
//! +------------+--------+----------------+
//! |   target   | flags  |      name      |
//! +------------+--------+----------------+
//! ```
//!
//! and is produced and parsed only by [`GlHandle::to_bits`] and
//! [`GlHandle::from_bits`].

use bitflags::bitflags;
use lumen_core::{Pipeline, Resource, ResourceView, Sampler};

use super::gl::{self, GLenum, GLuint};

const TARGET_SHIFT: u32 = 40;
const FLAGS_SHIFT: u32 = 32;
const TARGET_MASK: u64 = 0xFF_FFFF;

bitflags! {
    /// Per-handle flags stored between target and name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GlHandleFlags: u8 {
        /// The view reuses the name of its resource and must not delete it.
        const NOT_OWNED = 0x1;
        /// The view reinterprets the resource with sRGB decoding.
        const SRGB = 0x2;
    }
}

/// A GL object name tagged with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GlHandle {
    pub target: GLenum,
    pub flags: GlHandleFlags,
    pub name: GLuint,
}

impl GlHandle {
    pub const NULL: GlHandle = GlHandle {
        target: 0,
        flags: GlHandleFlags::empty(),
        name: 0,
    };

    pub fn new(target: GLenum, name: GLuint) -> Self {
        debug_assert!(u64::from(target) <= TARGET_MASK, "target {target:#x} out of range");
        Self {
            target,
            flags: GlHandleFlags::empty(),
            name,
        }
    }

    pub fn with_flags(mut self, flags: GlHandleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Color attachment of the default framebuffer.
    pub fn default_color() -> Self {
        Self::new(gl::FRAMEBUFFER_DEFAULT, gl::BACK)
    }

    /// Depth-stencil attachment of the default framebuffer.
    pub fn default_depth_stencil() -> Self {
        Self::new(gl::FRAMEBUFFER_DEFAULT, gl::DEPTH_STENCIL_ATTACHMENT)
    }

    pub fn to_bits(self) -> u64 {
        ((u64::from(self.target) & TARGET_MASK) << TARGET_SHIFT)
            | (u64::from(self.flags.bits()) << FLAGS_SHIFT)
            | u64::from(self.name)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            target: ((bits >> TARGET_SHIFT) & TARGET_MASK) as GLenum,
            flags: GlHandleFlags::from_bits_truncate((bits >> FLAGS_SHIFT) as u8),
            name: bits as GLuint,
        }
    }

    pub fn is_null(self) -> bool {
        self.to_bits() == 0
    }

    /// Returns `true` if the handle names an object the default framebuffer owns.
    pub fn is_default_framebuffer(self) -> bool {
        self.target == gl::FRAMEBUFFER_DEFAULT
    }

    /// The same object without view flags.
    pub fn without_flags(self) -> Self {
        Self {
            flags: GlHandleFlags::empty(),
            ..self
        }
    }

    pub fn resource(self) -> Resource {
        Resource(self.to_bits())
    }

    pub fn view(self) -> ResourceView {
        ResourceView(self.to_bits())
    }

    pub fn sampler(self) -> Sampler {
        Sampler(self.to_bits())
    }

    pub fn pipeline(self) -> Pipeline {
        Pipeline(self.to_bits())
    }
}

impl From<Resource> for GlHandle {
    fn from(resource: Resource) -> Self {
        GlHandle::from_bits(resource.raw())
    }
}

impl From<ResourceView> for GlHandle {
    fn from(view: ResourceView) -> Self {
        GlHandle::from_bits(view.raw())
    }
}

impl From<Sampler> for GlHandle {
    fn from(sampler: Sampler) -> Self {
        GlHandle::from_bits(sampler.raw())
    }
}

impl From<Pipeline> for GlHandle {
    fn from(pipeline: Pipeline) -> Self {
        GlHandle::from_bits(pipeline.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        let handle = GlHandle::new(gl::TEXTURE_2D, 7).with_flags(GlHandleFlags::NOT_OWNED);
        assert_eq!(handle.to_bits(), (0x0DE1 << 40) | (0x1 << 32) | 7);
        assert_eq!(GlHandle::from_bits(handle.to_bits()), handle);
    }

    #[test]
    fn test_name_and_target_survive_flags() {
        let handle = GlHandle::new(gl::TEXTURE_2D_MULTISAMPLE_ARRAY, u32::MAX)
            .with_flags(GlHandleFlags::NOT_OWNED | GlHandleFlags::SRGB);
        let decoded = GlHandle::from_bits(handle.to_bits());
        assert_eq!(decoded.target, gl::TEXTURE_2D_MULTISAMPLE_ARRAY);
        assert_eq!(decoded.name, u32::MAX);
        assert_eq!(decoded.without_flags(), GlHandle::new(gl::TEXTURE_2D_MULTISAMPLE_ARRAY, u32::MAX));
    }

    #[test]
    fn test_view_of_resource_differs_only_by_flags() {
        let resource = GlHandle::new(gl::TEXTURE_2D, 3);
        let view = resource.with_flags(GlHandleFlags::NOT_OWNED);
        assert_ne!(resource.resource().raw(), view.view().raw());
        assert_eq!(GlHandle::from(view.view()).without_flags(), resource);
    }

    #[test]
    fn test_null() {
        assert!(GlHandle::NULL.is_null());
        assert!(GlHandle::NULL.resource().is_null());
        assert!(!GlHandle::default_color().is_null());
        assert!(GlHandle::default_depth_stencil().is_default_framebuffer());
    }
}
