//! `DXGI_FORMAT` translation shared by the D3D10/11 and D3D12 backends.
//!
//! [`Format`] uses DXGI numbering, so every value in the DXGI range converts
//! by identity. Formats outside that range have no DXGI counterpart; the ones
//! with an equivalent memory layout map onto it.

use lumen_core::{Format, ResourceUsage};

/// Raw `DXGI_FORMAT` value.
pub type DxgiFormat = u32;

pub const DXGI_FORMAT_UNKNOWN: DxgiFormat = 0;

/// Convert an abstract format to `DXGI_FORMAT`.
///
/// Formats DXGI cannot express return `DXGI_FORMAT_UNKNOWN`.
pub fn convert_format(format: Format) -> DxgiFormat {
    if format.is_dxgi() {
        return format.raw();
    }
    match format {
        Format::R8G8B8X8Typeless => Format::R8G8B8A8Typeless.raw(),
        Format::R8G8B8X8Unorm => Format::R8G8B8A8Unorm.raw(),
        Format::R8G8B8X8UnormSrgb => Format::R8G8B8A8UnormSrgb.raw(),
        Format::B5G5R5X1Unorm => Format::B5G5R5A1Unorm.raw(),
        Format::L8Unorm => Format::R8Unorm.raw(),
        Format::A8L8Unorm => Format::R8G8Unorm.raw(),
        Format::L16Unorm => Format::R16Unorm.raw(),
        _ => DXGI_FORMAT_UNKNOWN,
    }
}

/// Convert a `DXGI_FORMAT` to an abstract format.
///
/// Values the abstract model does not know (video formats, for example)
/// become [`Format::Unknown`].
pub fn convert_dxgi_format(format: DxgiFormat) -> Format {
    Format::from_raw(format)
        .filter(|format| format.is_dxgi())
        .unwrap_or(Format::Unknown)
}

/// Format a view used for `usage` takes for a view format requested by the
/// caller.
///
/// Shader resource views of combined depth-stencil formats read only depth;
/// the stencil-only formats read only stencil. Depth-stencil views always
/// use the typed depth-stencil format of the family, and typeless formats
/// resolve to their default typed member.
pub fn dxgi_view_format(usage: ResourceUsage, format: Format) -> Format {
    let shader_visible = usage.intersects(ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS);
    if usage.intersects(ResourceUsage::DEPTH_STENCIL) {
        format.to_depth_stencil_typed()
    } else if shader_visible && format.is_stencil_view() {
        format
    } else if shader_visible && format == Format::D16Unorm {
        Format::R16Unorm
    } else if shader_visible && format.is_depth_stencil() {
        format.to_typeless().to_default_typed(false)
    } else if format.to_typeless() == format {
        format.to_default_typed(false)
    } else {
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_in_dxgi_range() {
        for raw in 0..0x100 {
            if let Some(format) = Format::from_raw(raw) {
                assert_eq!(convert_format(format), raw);
                assert_eq!(convert_dxgi_format(raw), format);
            }
        }
    }

    #[test]
    fn test_rgbx_maps_to_rgba() {
        assert_eq!(convert_format(Format::R8G8B8X8Unorm), 28);
        assert_eq!(convert_format(Format::R8G8B8X8UnormSrgb), 29);
        assert_eq!(convert_format(Format::Intz), DXGI_FORMAT_UNKNOWN);
    }

    #[test]
    fn test_unknown_native_values() {
        // DXGI_FORMAT_NV12
        assert_eq!(convert_dxgi_format(103), Format::Unknown);
        assert_eq!(convert_dxgi_format(0x1003), Format::Unknown);
    }

    #[test]
    fn test_depth_view_formats() {
        assert_eq!(
            dxgi_view_format(ResourceUsage::SHADER_RESOURCE, Format::R24G8Typeless),
            Format::R24UnormX8Typeless
        );
        assert_eq!(
            dxgi_view_format(ResourceUsage::DEPTH_STENCIL, Format::R24G8Typeless),
            Format::D24UnormS8Uint
        );
        assert_eq!(
            dxgi_view_format(ResourceUsage::SHADER_RESOURCE, Format::X32TypelessG8X24Uint),
            Format::X32TypelessG8X24Uint
        );
    }
}
