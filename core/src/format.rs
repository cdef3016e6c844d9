//! Abstract pixel format shared by every backend.
//!
//! The numeric values of [`Format`] follow the DXGI enumeration so that the
//! D3D10/11/12 translation is an identity for every known value. Formats that
//! have no DXGI counterpart (luminance formats, `RGBX` layouts) use values
//! outside the DXGI range.

/// Pixel or vertex attribute format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u32)]
pub enum Format {
    #[default]
    Unknown = 0,

    R32G32B32A32Typeless = 1,
    R32G32B32A32Float = 2,
    R32G32B32A32Uint = 3,
    R32G32B32A32Sint = 4,
    R32G32B32Typeless = 5,
    R32G32B32Float = 6,
    R32G32B32Uint = 7,
    R32G32B32Sint = 8,
    R16G16B16A16Typeless = 9,
    R16G16B16A16Float = 10,
    R16G16B16A16Unorm = 11,
    R16G16B16A16Uint = 12,
    R16G16B16A16Snorm = 13,
    R16G16B16A16Sint = 14,
    R32G32Typeless = 15,
    R32G32Float = 16,
    R32G32Uint = 17,
    R32G32Sint = 18,
    R32G8X24Typeless = 19,
    D32FloatS8X24Uint = 20,
    R32FloatX8X24Typeless = 21,
    X32TypelessG8X24Uint = 22,
    R10G10B10A2Typeless = 23,
    R10G10B10A2Unorm = 24,
    R10G10B10A2Uint = 25,
    R11G11B10Float = 26,
    R8G8B8A8Typeless = 27,
    R8G8B8A8Unorm = 28,
    R8G8B8A8UnormSrgb = 29,
    R8G8B8A8Uint = 30,
    R8G8B8A8Snorm = 31,
    R8G8B8A8Sint = 32,
    R16G16Typeless = 33,
    R16G16Float = 34,
    R16G16Unorm = 35,
    R16G16Uint = 36,
    R16G16Snorm = 37,
    R16G16Sint = 38,
    R32Typeless = 39,
    D32Float = 40,
    R32Float = 41,
    R32Uint = 42,
    R32Sint = 43,
    R24G8Typeless = 44,
    D24UnormS8Uint = 45,
    R24UnormX8Typeless = 46,
    X24TypelessG8Uint = 47,
    R8G8Typeless = 48,
    R8G8Unorm = 49,
    R8G8Uint = 50,
    R8G8Snorm = 51,
    R8G8Sint = 52,
    R16Typeless = 53,
    R16Float = 54,
    D16Unorm = 55,
    R16Unorm = 56,
    R16Uint = 57,
    R16Snorm = 58,
    R16Sint = 59,
    R8Typeless = 60,
    R8Unorm = 61,
    R8Uint = 62,
    R8Snorm = 63,
    R8Sint = 64,
    A8Unorm = 65,
    R9G9B9E5 = 67,
    Bc1Typeless = 70,
    Bc1Unorm = 71,
    Bc1UnormSrgb = 72,
    Bc2Typeless = 73,
    Bc2Unorm = 74,
    Bc2UnormSrgb = 75,
    Bc3Typeless = 76,
    Bc3Unorm = 77,
    Bc3UnormSrgb = 78,
    Bc4Typeless = 79,
    Bc4Unorm = 80,
    Bc4Snorm = 81,
    Bc5Typeless = 82,
    Bc5Unorm = 83,
    Bc5Snorm = 84,
    B5G6R5Unorm = 85,
    B5G5R5A1Unorm = 86,
    B8G8R8A8Unorm = 87,
    B8G8R8X8Unorm = 88,
    B8G8R8A8Typeless = 90,
    B8G8R8A8UnormSrgb = 91,
    B8G8R8X8Typeless = 92,
    B8G8R8X8UnormSrgb = 93,
    Bc6hTypeless = 94,
    Bc6hUf16 = 95,
    Bc6hSf16 = 96,
    Bc7Typeless = 97,
    Bc7Unorm = 98,
    Bc7UnormSrgb = 99,
    B4G4R4A4Unorm = 115,

    // Formats without a DXGI equivalent.
    S8Uint = 0x1000,
    D16UnormS8Uint = 0x1001,
    R8G8B8X8Typeless = 0x1002,
    R8G8B8X8Unorm = 0x1003,
    R8G8B8X8UnormSrgb = 0x1004,
    B5G5R5X1Unorm = 0x1005,
    L8Unorm = 0x1006,
    A8L8Unorm = 0x1007,
    L16Unorm = 0x1008,
    /// Packed 24-bit depth without stencil.
    X8D24Unorm = 0x1009,
    /// Legacy `INTZ` readable depth-stencil format.
    Intz = 0x100A,
}

/// Every format, sorted by raw value.
const ALL_FORMATS: &[Format] = &[
    Format::Unknown,
    Format::R32G32B32A32Typeless,
    Format::R32G32B32A32Float,
    Format::R32G32B32A32Uint,
    Format::R32G32B32A32Sint,
    Format::R32G32B32Typeless,
    Format::R32G32B32Float,
    Format::R32G32B32Uint,
    Format::R32G32B32Sint,
    Format::R16G16B16A16Typeless,
    Format::R16G16B16A16Float,
    Format::R16G16B16A16Unorm,
    Format::R16G16B16A16Uint,
    Format::R16G16B16A16Snorm,
    Format::R16G16B16A16Sint,
    Format::R32G32Typeless,
    Format::R32G32Float,
    Format::R32G32Uint,
    Format::R32G32Sint,
    Format::R32G8X24Typeless,
    Format::D32FloatS8X24Uint,
    Format::R32FloatX8X24Typeless,
    Format::X32TypelessG8X24Uint,
    Format::R10G10B10A2Typeless,
    Format::R10G10B10A2Unorm,
    Format::R10G10B10A2Uint,
    Format::R11G11B10Float,
    Format::R8G8B8A8Typeless,
    Format::R8G8B8A8Unorm,
    Format::R8G8B8A8UnormSrgb,
    Format::R8G8B8A8Uint,
    Format::R8G8B8A8Snorm,
    Format::R8G8B8A8Sint,
    Format::R16G16Typeless,
    Format::R16G16Float,
    Format::R16G16Unorm,
    Format::R16G16Uint,
    Format::R16G16Snorm,
    Format::R16G16Sint,
    Format::R32Typeless,
    Format::D32Float,
    Format::R32Float,
    Format::R32Uint,
    Format::R32Sint,
    Format::R24G8Typeless,
    Format::D24UnormS8Uint,
    Format::R24UnormX8Typeless,
    Format::X24TypelessG8Uint,
    Format::R8G8Typeless,
    Format::R8G8Unorm,
    Format::R8G8Uint,
    Format::R8G8Snorm,
    Format::R8G8Sint,
    Format::R16Typeless,
    Format::R16Float,
    Format::D16Unorm,
    Format::R16Unorm,
    Format::R16Uint,
    Format::R16Snorm,
    Format::R16Sint,
    Format::R8Typeless,
    Format::R8Unorm,
    Format::R8Uint,
    Format::R8Snorm,
    Format::R8Sint,
    Format::A8Unorm,
    Format::R9G9B9E5,
    Format::Bc1Typeless,
    Format::Bc1Unorm,
    Format::Bc1UnormSrgb,
    Format::Bc2Typeless,
    Format::Bc2Unorm,
    Format::Bc2UnormSrgb,
    Format::Bc3Typeless,
    Format::Bc3Unorm,
    Format::Bc3UnormSrgb,
    Format::Bc4Typeless,
    Format::Bc4Unorm,
    Format::Bc4Snorm,
    Format::Bc5Typeless,
    Format::Bc5Unorm,
    Format::Bc5Snorm,
    Format::B5G6R5Unorm,
    Format::B5G5R5A1Unorm,
    Format::B8G8R8A8Unorm,
    Format::B8G8R8X8Unorm,
    Format::B8G8R8A8Typeless,
    Format::B8G8R8A8UnormSrgb,
    Format::B8G8R8X8Typeless,
    Format::B8G8R8X8UnormSrgb,
    Format::Bc6hTypeless,
    Format::Bc6hUf16,
    Format::Bc6hSf16,
    Format::Bc7Typeless,
    Format::Bc7Unorm,
    Format::Bc7UnormSrgb,
    Format::B4G4R4A4Unorm,
    Format::S8Uint,
    Format::D16UnormS8Uint,
    Format::R8G8B8X8Typeless,
    Format::R8G8B8X8Unorm,
    Format::R8G8B8X8UnormSrgb,
    Format::B5G5R5X1Unorm,
    Format::L8Unorm,
    Format::A8L8Unorm,
    Format::L16Unorm,
    Format::X8D24Unorm,
    Format::Intz,
];

impl Format {
    /// Returns the raw numeric value of this format.
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Format with the raw value `raw`, if there is one.
    pub fn from_raw(raw: u32) -> Option<Format> {
        ALL_FORMATS
            .binary_search_by_key(&raw, |format| format.raw())
            .ok()
            .map(|index| ALL_FORMATS[index])
    }

    /// Returns `true` if the raw value lies in the DXGI range.
    pub fn is_dxgi(self) -> bool {
        self.raw() < 0x1000
    }

    /// Returns `true` for formats with a depth or stencil component.
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::D16UnormS8Uint
                | Format::D24UnormS8Uint
                | Format::D32Float
                | Format::D32FloatS8X24Uint
                | Format::X8D24Unorm
                | Format::S8Uint
                | Format::Intz
        )
    }

    /// Returns `true` if the format carries a depth component.
    pub fn has_depth(self) -> bool {
        self.is_depth_stencil() && self != Format::S8Uint
    }

    /// Returns `true` if the format carries a stencil component.
    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Format::D16UnormS8Uint
                | Format::D24UnormS8Uint
                | Format::D32FloatS8X24Uint
                | Format::S8Uint
                | Format::Intz
        )
    }

    /// Returns `true` for the typed formats that view only the stencil plane
    /// of a combined depth-stencil resource.
    pub fn is_stencil_view(self) -> bool {
        matches!(self, Format::X24TypelessG8Uint | Format::X32TypelessG8X24Uint)
    }

    /// Returns `true` for formats whose alpha channel is undefined and must
    /// read as one.
    pub fn has_undefined_alpha(self) -> bool {
        matches!(
            self,
            Format::R8G8B8X8Typeless
                | Format::R8G8B8X8Unorm
                | Format::R8G8B8X8UnormSrgb
                | Format::B8G8R8X8Typeless
                | Format::B8G8R8X8Unorm
                | Format::B8G8R8X8UnormSrgb
                | Format::B5G5R5X1Unorm
        )
    }

    /// Returns `true` for alpha-only formats.
    pub fn is_alpha_only(self) -> bool {
        self == Format::A8Unorm
    }

    /// Returns `true` for sRGB formats.
    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            Format::R8G8B8A8UnormSrgb
                | Format::R8G8B8X8UnormSrgb
                | Format::B8G8R8A8UnormSrgb
                | Format::B8G8R8X8UnormSrgb
                | Format::Bc1UnormSrgb
                | Format::Bc2UnormSrgb
                | Format::Bc3UnormSrgb
                | Format::Bc7UnormSrgb
        )
    }

    /// Returns `true` for block-compressed formats.
    pub fn is_compressed(self) -> bool {
        (Format::Bc1Typeless..=Format::Bc5Snorm).contains(&self)
            || (Format::Bc6hTypeless..=Format::Bc7UnormSrgb).contains(&self)
    }

    /// Returns the typeless format of the family this format belongs to.
    ///
    /// Formats without a typeless family are returned unchanged.
    pub fn to_typeless(self) -> Format {
        use Format::*;
        match self {
            R32G32B32A32Float | R32G32B32A32Uint | R32G32B32A32Sint => R32G32B32A32Typeless,
            R32G32B32Float | R32G32B32Uint | R32G32B32Sint => R32G32B32Typeless,
            R16G16B16A16Float | R16G16B16A16Unorm | R16G16B16A16Uint | R16G16B16A16Snorm
            | R16G16B16A16Sint => R16G16B16A16Typeless,
            R32G32Float | R32G32Uint | R32G32Sint => R32G32Typeless,
            D32FloatS8X24Uint | R32FloatX8X24Typeless | X32TypelessG8X24Uint => R32G8X24Typeless,
            R10G10B10A2Unorm | R10G10B10A2Uint => R10G10B10A2Typeless,
            R8G8B8A8Unorm | R8G8B8A8UnormSrgb | R8G8B8A8Uint | R8G8B8A8Snorm | R8G8B8A8Sint => {
                R8G8B8A8Typeless
            }
            R8G8B8X8Unorm | R8G8B8X8UnormSrgb => R8G8B8X8Typeless,
            B8G8R8A8Unorm | B8G8R8A8UnormSrgb => B8G8R8A8Typeless,
            B8G8R8X8Unorm | B8G8R8X8UnormSrgb => B8G8R8X8Typeless,
            R16G16Float | R16G16Unorm | R16G16Uint | R16G16Snorm | R16G16Sint => R16G16Typeless,
            D32Float | R32Float | R32Uint | R32Sint => R32Typeless,
            D24UnormS8Uint | R24UnormX8Typeless | X24TypelessG8Uint => R24G8Typeless,
            R8G8Unorm | R8G8Uint | R8G8Snorm | R8G8Sint => R8G8Typeless,
            R16Float | D16Unorm | R16Unorm | R16Uint | R16Snorm | R16Sint => R16Typeless,
            R8Unorm | R8Uint | R8Snorm | R8Sint => R8Typeless,
            Bc1Unorm | Bc1UnormSrgb => Bc1Typeless,
            Bc2Unorm | Bc2UnormSrgb => Bc2Typeless,
            Bc3Unorm | Bc3UnormSrgb => Bc3Typeless,
            Bc4Unorm | Bc4Snorm => Bc4Typeless,
            Bc5Unorm | Bc5Snorm => Bc5Typeless,
            Bc6hUf16 | Bc6hSf16 => Bc6hTypeless,
            Bc7Unorm | Bc7UnormSrgb => Bc7Typeless,
            other => other,
        }
    }

    /// Returns the default typed format for a typeless format, selecting the
    /// sRGB variant when `srgb` is set and one exists.
    pub fn to_default_typed(self, srgb: bool) -> Format {
        use Format::*;
        match self {
            R32G32B32A32Typeless => R32G32B32A32Float,
            R32G32B32Typeless => R32G32B32Float,
            R16G16B16A16Typeless => R16G16B16A16Float,
            R32G32Typeless => R32G32Float,
            R32G8X24Typeless => R32FloatX8X24Typeless,
            R10G10B10A2Typeless => R10G10B10A2Unorm,
            R8G8B8A8Typeless | R8G8B8A8Unorm | R8G8B8A8UnormSrgb => {
                if srgb {
                    R8G8B8A8UnormSrgb
                } else {
                    R8G8B8A8Unorm
                }
            }
            R8G8B8X8Typeless | R8G8B8X8Unorm | R8G8B8X8UnormSrgb => {
                if srgb {
                    R8G8B8X8UnormSrgb
                } else {
                    R8G8B8X8Unorm
                }
            }
            B8G8R8A8Typeless | B8G8R8A8Unorm | B8G8R8A8UnormSrgb => {
                if srgb {
                    B8G8R8A8UnormSrgb
                } else {
                    B8G8R8A8Unorm
                }
            }
            B8G8R8X8Typeless | B8G8R8X8Unorm | B8G8R8X8UnormSrgb => {
                if srgb {
                    B8G8R8X8UnormSrgb
                } else {
                    B8G8R8X8Unorm
                }
            }
            R16G16Typeless => R16G16Float,
            R32Typeless => R32Float,
            R24G8Typeless => R24UnormX8Typeless,
            R8G8Typeless => R8G8Unorm,
            R16Typeless => R16Float,
            R8Typeless => R8Unorm,
            Bc1Typeless | Bc1Unorm | Bc1UnormSrgb => {
                if srgb {
                    Bc1UnormSrgb
                } else {
                    Bc1Unorm
                }
            }
            Bc2Typeless | Bc2Unorm | Bc2UnormSrgb => {
                if srgb {
                    Bc2UnormSrgb
                } else {
                    Bc2Unorm
                }
            }
            Bc3Typeless | Bc3Unorm | Bc3UnormSrgb => {
                if srgb {
                    Bc3UnormSrgb
                } else {
                    Bc3Unorm
                }
            }
            Bc4Typeless => Bc4Unorm,
            Bc5Typeless => Bc5Unorm,
            Bc6hTypeless => Bc6hUf16,
            Bc7Typeless | Bc7Unorm | Bc7UnormSrgb => {
                if srgb {
                    Bc7UnormSrgb
                } else {
                    Bc7Unorm
                }
            }
            other => other,
        }
    }

    /// Returns the depth-stencil typed format of a typeless or shader-readable
    /// depth family.
    pub fn to_depth_stencil_typed(self) -> Format {
        use Format::*;
        match self {
            R32G8X24Typeless | R32FloatX8X24Typeless | X32TypelessG8X24Uint => D32FloatS8X24Uint,
            R32Typeless | R32Float => D32Float,
            R24G8Typeless | R24UnormX8Typeless | X24TypelessG8Uint => D24UnormS8Uint,
            R16Typeless | R16Unorm => D16Unorm,
            other => other,
        }
    }

    /// Size in bytes of one texel, or of one 4x4 block for compressed formats.
    ///
    /// Returns `0` for [`Format::Unknown`].
    pub fn bytes_per_block(self) -> u32 {
        use Format::*;
        match self {
            Unknown => 0,
            R32G32B32A32Typeless | R32G32B32A32Float | R32G32B32A32Uint | R32G32B32A32Sint => 16,
            R32G32B32Typeless | R32G32B32Float | R32G32B32Uint | R32G32B32Sint => 12,
            R16G16B16A16Typeless | R16G16B16A16Float | R16G16B16A16Unorm | R16G16B16A16Uint
            | R16G16B16A16Snorm | R16G16B16A16Sint | R32G32Typeless | R32G32Float
            | R32G32Uint | R32G32Sint | R32G8X24Typeless | D32FloatS8X24Uint
            | R32FloatX8X24Typeless | X32TypelessG8X24Uint => 8,
            R8G8Typeless | R8G8Unorm | R8G8Uint | R8G8Snorm | R8G8Sint | R16Typeless
            | R16Float | D16Unorm | R16Unorm | R16Uint | R16Snorm | R16Sint | B5G6R5Unorm
            | B5G5R5A1Unorm | B5G5R5X1Unorm | B4G4R4A4Unorm | A8L8Unorm | L16Unorm => 2,
            R8Typeless | R8Unorm | R8Uint | R8Snorm | R8Sint | A8Unorm | L8Unorm | S8Uint => 1,
            D16UnormS8Uint => 4,
            Bc1Typeless | Bc1Unorm | Bc1UnormSrgb | Bc4Typeless | Bc4Unorm | Bc4Snorm => 8,
            Bc2Typeless | Bc2Unorm | Bc2UnormSrgb | Bc3Typeless | Bc3Unorm | Bc3UnormSrgb
            | Bc5Typeless | Bc5Unorm | Bc5Snorm | Bc6hTypeless | Bc6hUf16 | Bc6hSf16
            | Bc7Typeless | Bc7Unorm | Bc7UnormSrgb => 16,
            _ => 4,
        }
    }

    /// Number of bytes in one row of `width` texels.
    pub fn row_pitch(self, width: u32) -> u32 {
        if self.is_compressed() {
            width.div_ceil(4) * self.bytes_per_block()
        } else {
            width * self.bytes_per_block()
        }
    }

    /// Number of bytes in one `width` x `height` slice.
    pub fn slice_pitch(self, width: u32, height: u32) -> u32 {
        let rows = if self.is_compressed() {
            height.div_ceil(4)
        } else {
            height
        };
        self.row_pitch(width) * rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_from_raw() {
        assert!(ALL_FORMATS.windows(2).all(|pair| pair[0].raw() < pair[1].raw()));
        for format in ALL_FORMATS {
            assert_eq!(Format::from_raw(format.raw()), Some(*format));
        }
        assert_eq!(Format::from_raw(66), None);
        assert!(Format::R8G8B8A8Unorm.is_dxgi());
        assert!(!Format::L8Unorm.is_dxgi());
    }

    #[rstest]
    #[case::rgba8(Format::R8G8B8A8Unorm, 28)]
    #[case::d24s8(Format::D24UnormS8Uint, 45)]
    #[case::bgra8_srgb(Format::B8G8R8A8UnormSrgb, 91)]
    #[case::bc7_srgb(Format::Bc7UnormSrgb, 99)]
    fn test_dxgi_numbering(#[case] format: Format, #[case] raw: u32) {
        assert_eq!(format.raw(), raw);
        assert_eq!(Format::from_raw(raw), Some(format));
    }

    #[rstest]
    #[case::srgb(Format::R8G8B8A8UnormSrgb, Format::R8G8B8A8Typeless)]
    #[case::depth(Format::D32Float, Format::R32Typeless)]
    #[case::already_typeless(Format::R8G8B8A8Typeless, Format::R8G8B8A8Typeless)]
    fn test_typeless_family(#[case] format: Format, #[case] typeless: Format) {
        assert_eq!(format.to_typeless(), typeless);
    }

    #[test]
    fn test_typed_from_typeless() {
        assert_eq!(
            Format::R8G8B8A8Typeless.to_default_typed(true),
            Format::R8G8B8A8UnormSrgb
        );
        assert_eq!(Format::R24G8Typeless.to_depth_stencil_typed(), Format::D24UnormS8Uint);
    }

    #[test]
    fn test_depth_stencil_classification() {
        assert!(Format::D24UnormS8Uint.has_depth());
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::D32Float.has_stencil());
        assert!(Format::S8Uint.has_stencil());
        assert!(!Format::S8Uint.has_depth());
        assert!(!Format::R8G8B8A8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_pitches() {
        assert_eq!(Format::R8G8B8A8Unorm.row_pitch(256), 1024);
        assert_eq!(Format::Bc1Unorm.row_pitch(256), 512);
        assert_eq!(Format::Bc1Unorm.slice_pitch(256, 256), 512 * 64);
    }
}
