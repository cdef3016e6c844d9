//! OpenGL enumerant values used by the layer.

#![allow(dead_code)]

pub type GLenum = u32;
pub type GLuint = u32;
pub type GLint = i32;
pub type GLbitfield = u32;
pub type GLsizei = i32;

pub const NONE: GLenum = 0;
pub const ZERO: GLenum = 0;
pub const ONE: GLenum = 1;
pub const TRUE: GLint = 1;
pub const FALSE: GLint = 0;

// Errors
pub const NO_ERROR: GLenum = 0;
pub const INVALID_ENUM: GLenum = 0x0500;
pub const INVALID_VALUE: GLenum = 0x0501;
pub const INVALID_OPERATION: GLenum = 0x0502;
pub const OUT_OF_MEMORY: GLenum = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: GLenum = 0x0506;

// Texture targets
pub const TEXTURE: GLenum = 0x1702;
pub const TEXTURE_1D: GLenum = 0x0DE0;
pub const TEXTURE_2D: GLenum = 0x0DE1;
pub const TEXTURE_3D: GLenum = 0x806F;
pub const TEXTURE_1D_ARRAY: GLenum = 0x8C18;
pub const TEXTURE_2D_ARRAY: GLenum = 0x8C1A;
pub const TEXTURE_RECTANGLE: GLenum = 0x84F5;
pub const TEXTURE_CUBE_MAP: GLenum = 0x8513;
pub const TEXTURE_CUBE_MAP_POSITIVE_X: GLenum = 0x8515;
pub const TEXTURE_CUBE_MAP_NEGATIVE_Z: GLenum = 0x851A;
pub const TEXTURE_CUBE_MAP_ARRAY: GLenum = 0x9009;
pub const TEXTURE_2D_MULTISAMPLE: GLenum = 0x9100;
pub const TEXTURE_2D_MULTISAMPLE_ARRAY: GLenum = 0x9102;
pub const TEXTURE_BUFFER: GLenum = 0x8C2A;

// Buffer targets
pub const ARRAY_BUFFER: GLenum = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: GLenum = 0x8893;
pub const PIXEL_PACK_BUFFER: GLenum = 0x88EB;
pub const PIXEL_UNPACK_BUFFER: GLenum = 0x88EC;
pub const UNIFORM_BUFFER: GLenum = 0x8A11;
pub const SHADER_STORAGE_BUFFER: GLenum = 0x90D2;
pub const COPY_READ_BUFFER: GLenum = 0x8F36;
pub const COPY_WRITE_BUFFER: GLenum = 0x8F37;
pub const DRAW_INDIRECT_BUFFER: GLenum = 0x8F3F;
pub const DISPATCH_INDIRECT_BUFFER: GLenum = 0x90EE;
pub const TRANSFORM_FEEDBACK_BUFFER: GLenum = 0x8C8E;

// Buffer storage flags
pub const MAP_READ_BIT: GLbitfield = 0x0001;
pub const MAP_WRITE_BIT: GLbitfield = 0x0002;
pub const DYNAMIC_STORAGE_BIT: GLbitfield = 0x0100;

// Buffer data usage hints
pub const STREAM_DRAW: GLenum = 0x88E0;
pub const STREAM_READ: GLenum = 0x88E1;
pub const STATIC_DRAW: GLenum = 0x88E4;
pub const STATIC_READ: GLenum = 0x88E5;
pub const DYNAMIC_DRAW: GLenum = 0x88E8;
pub const DYNAMIC_READ: GLenum = 0x88E9;

// Objects
pub const RENDERBUFFER: GLenum = 0x8D41;
pub const FRAMEBUFFER: GLenum = 0x8D40;
pub const READ_FRAMEBUFFER: GLenum = 0x8CA8;
pub const DRAW_FRAMEBUFFER: GLenum = 0x8CA9;
pub const FRAMEBUFFER_DEFAULT: GLenum = 0x8218;
pub const SAMPLER: GLenum = 0x82E6;
pub const PROGRAM: GLenum = 0x82E2;

// Framebuffer attachments
pub const BACK: GLenum = 0x0405;
pub const COLOR_ATTACHMENT0: GLenum = 0x8CE0;
pub const DEPTH_ATTACHMENT: GLenum = 0x8D00;
pub const STENCIL_ATTACHMENT: GLenum = 0x8D20;
pub const DEPTH_STENCIL_ATTACHMENT: GLenum = 0x821A;

// Clear
pub const DEPTH_BUFFER_BIT: GLbitfield = 0x0100;
pub const STENCIL_BUFFER_BIT: GLbitfield = 0x0400;
pub const COLOR_BUFFER_BIT: GLbitfield = 0x4000;

// Texture parameters
pub const TEXTURE_SWIZZLE_RGBA: GLenum = 0x8E46;
pub const DEPTH_STENCIL_TEXTURE_MODE: GLenum = 0x90EA;
pub const RED: GLenum = 0x1903;
pub const GREEN: GLenum = 0x1904;
pub const BLUE: GLenum = 0x1905;
pub const ALPHA: GLenum = 0x1906;
pub const DEPTH_COMPONENT: GLenum = 0x1902;
pub const STENCIL_INDEX: GLenum = 0x1901;

// Sampler parameters
pub const TEXTURE_MAG_FILTER: GLenum = 0x2800;
pub const TEXTURE_MIN_FILTER: GLenum = 0x2801;
pub const TEXTURE_WRAP_S: GLenum = 0x2802;
pub const TEXTURE_WRAP_T: GLenum = 0x2803;
pub const TEXTURE_WRAP_R: GLenum = 0x8072;
pub const TEXTURE_BORDER_COLOR: GLenum = 0x1004;
pub const TEXTURE_LOD_BIAS: GLenum = 0x8501;
pub const TEXTURE_MIN_LOD: GLenum = 0x813A;
pub const TEXTURE_MAX_LOD: GLenum = 0x813B;
pub const TEXTURE_COMPARE_MODE: GLenum = 0x884C;
pub const TEXTURE_COMPARE_FUNC: GLenum = 0x884D;
pub const COMPARE_REF_TO_TEXTURE: GLenum = 0x884E;
pub const TEXTURE_MAX_ANISOTROPY: GLenum = 0x84FE;

pub const NEAREST: GLenum = 0x2600;
pub const LINEAR: GLenum = 0x2601;
pub const NEAREST_MIPMAP_NEAREST: GLenum = 0x2700;
pub const LINEAR_MIPMAP_NEAREST: GLenum = 0x2701;
pub const NEAREST_MIPMAP_LINEAR: GLenum = 0x2702;
pub const LINEAR_MIPMAP_LINEAR: GLenum = 0x2703;

pub const REPEAT: GLenum = 0x2901;
pub const MIRRORED_REPEAT: GLenum = 0x8370;
pub const CLAMP_TO_EDGE: GLenum = 0x812F;
pub const CLAMP_TO_BORDER: GLenum = 0x812D;
pub const MIRROR_CLAMP_TO_EDGE: GLenum = 0x8743;

// Comparison functions
pub const NEVER: GLenum = 0x0200;
pub const LESS: GLenum = 0x0201;
pub const EQUAL: GLenum = 0x0202;
pub const LEQUAL: GLenum = 0x0203;
pub const GREATER: GLenum = 0x0204;
pub const NOTEQUAL: GLenum = 0x0205;
pub const GEQUAL: GLenum = 0x0206;
pub const ALWAYS: GLenum = 0x0207;

// Stencil operations
pub const KEEP: GLenum = 0x1E00;
pub const REPLACE: GLenum = 0x1E01;
pub const INCR: GLenum = 0x1E02;
pub const DECR: GLenum = 0x1E03;
pub const INVERT: GLenum = 0x150A;
pub const INCR_WRAP: GLenum = 0x8507;
pub const DECR_WRAP: GLenum = 0x8508;

// Blend factors
pub const SRC_COLOR: GLenum = 0x0300;
pub const ONE_MINUS_SRC_COLOR: GLenum = 0x0301;
pub const SRC_ALPHA: GLenum = 0x0302;
pub const ONE_MINUS_SRC_ALPHA: GLenum = 0x0303;
pub const DST_ALPHA: GLenum = 0x0304;
pub const ONE_MINUS_DST_ALPHA: GLenum = 0x0305;
pub const DST_COLOR: GLenum = 0x0306;
pub const ONE_MINUS_DST_COLOR: GLenum = 0x0307;
pub const SRC_ALPHA_SATURATE: GLenum = 0x0308;
pub const CONSTANT_COLOR: GLenum = 0x8001;
pub const ONE_MINUS_CONSTANT_COLOR: GLenum = 0x8002;
pub const CONSTANT_ALPHA: GLenum = 0x8003;
pub const ONE_MINUS_CONSTANT_ALPHA: GLenum = 0x8004;
pub const SRC1_COLOR: GLenum = 0x88F9;
pub const ONE_MINUS_SRC1_COLOR: GLenum = 0x88FA;
pub const SRC1_ALPHA: GLenum = 0x8589;
pub const ONE_MINUS_SRC1_ALPHA: GLenum = 0x88FB;

// Blend equations
pub const FUNC_ADD: GLenum = 0x8006;
pub const MIN: GLenum = 0x8007;
pub const MAX: GLenum = 0x8008;
pub const FUNC_SUBTRACT: GLenum = 0x800A;
pub const FUNC_REVERSE_SUBTRACT: GLenum = 0x800B;

// Logic operations
pub const CLEAR: GLenum = 0x1500;
pub const AND: GLenum = 0x1501;
pub const AND_REVERSE: GLenum = 0x1502;
pub const COPY: GLenum = 0x1503;
pub const AND_INVERTED: GLenum = 0x1504;
pub const NOOP: GLenum = 0x1505;
pub const XOR: GLenum = 0x1506;
pub const OR: GLenum = 0x1507;
pub const NOR: GLenum = 0x1508;
pub const EQUIV: GLenum = 0x1509;
pub const OR_REVERSE: GLenum = 0x150B;
pub const COPY_INVERTED: GLenum = 0x150C;
pub const OR_INVERTED: GLenum = 0x150D;
pub const NAND: GLenum = 0x150E;
pub const SET: GLenum = 0x150F;

// Rasterizer
pub const POINT: GLenum = 0x1B00;
pub const LINE: GLenum = 0x1B01;
pub const FILL: GLenum = 0x1B02;
pub const FRONT: GLenum = 0x0404;
pub const FRONT_AND_BACK: GLenum = 0x0408;
pub const CW: GLenum = 0x0900;
pub const CCW: GLenum = 0x0901;

// Primitive modes
pub const POINTS: GLenum = 0x0000;
pub const LINES: GLenum = 0x0001;
pub const LINE_STRIP: GLenum = 0x0003;
pub const TRIANGLES: GLenum = 0x0004;
pub const TRIANGLE_STRIP: GLenum = 0x0005;
pub const TRIANGLE_FAN: GLenum = 0x0006;
pub const LINES_ADJACENCY: GLenum = 0x000A;
pub const LINE_STRIP_ADJACENCY: GLenum = 0x000B;
pub const TRIANGLES_ADJACENCY: GLenum = 0x000C;
pub const TRIANGLE_STRIP_ADJACENCY: GLenum = 0x000D;
pub const PATCHES: GLenum = 0x000E;

// Shader types
pub const FRAGMENT_SHADER: GLenum = 0x8B30;
pub const VERTEX_SHADER: GLenum = 0x8B31;
pub const GEOMETRY_SHADER: GLenum = 0x8DD9;
pub const TESS_EVALUATION_SHADER: GLenum = 0x8E87;
pub const TESS_CONTROL_SHADER: GLenum = 0x8E88;
pub const COMPUTE_SHADER: GLenum = 0x91B9;

// Data types
pub const BYTE: GLenum = 0x1400;
pub const UNSIGNED_BYTE: GLenum = 0x1401;
pub const SHORT: GLenum = 0x1402;
pub const UNSIGNED_SHORT: GLenum = 0x1403;
pub const INT: GLenum = 0x1404;
pub const UNSIGNED_INT: GLenum = 0x1405;
pub const FLOAT: GLenum = 0x1406;
pub const HALF_FLOAT: GLenum = 0x140B;
pub const UNSIGNED_INT_2_10_10_10_REV: GLenum = 0x8368;
pub const UNSIGNED_INT_10F_11F_11F_REV: GLenum = 0x8C3B;

// Internal format queries
pub const INTERNALFORMAT_SUPPORTED: GLenum = 0x826F;
pub const FRAMEBUFFER_RENDERABLE: GLenum = 0x8289;
pub const FILTER: GLenum = 0x829A;
pub const SHADER_IMAGE_LOAD: GLenum = 0x82A4;
pub const FULL_SUPPORT: GLint = 0x82B7;

// Sized internal formats
pub const R8: GLenum = 0x8229;
pub const R8_SNORM: GLenum = 0x8F94;
pub const R8UI: GLenum = 0x8232;
pub const R8I: GLenum = 0x8231;
pub const R16: GLenum = 0x822A;
pub const R16_SNORM: GLenum = 0x8F98;
pub const R16F: GLenum = 0x822D;
pub const R16UI: GLenum = 0x8234;
pub const R16I: GLenum = 0x8233;
pub const R32F: GLenum = 0x822E;
pub const R32UI: GLenum = 0x8236;
pub const R32I: GLenum = 0x8235;
pub const RG8: GLenum = 0x822B;
pub const RG8_SNORM: GLenum = 0x8F95;
pub const RG8UI: GLenum = 0x8238;
pub const RG8I: GLenum = 0x8237;
pub const RG16: GLenum = 0x822C;
pub const RG16_SNORM: GLenum = 0x8F99;
pub const RG16F: GLenum = 0x822F;
pub const RG16UI: GLenum = 0x823A;
pub const RG16I: GLenum = 0x8239;
pub const RG32F: GLenum = 0x8230;
pub const RG32UI: GLenum = 0x823C;
pub const RG32I: GLenum = 0x823B;
pub const RGB5: GLenum = 0x8050;
pub const RGB565: GLenum = 0x8D62;
pub const RGB8: GLenum = 0x8051;
pub const SRGB8: GLenum = 0x8C41;
pub const RGB32F: GLenum = 0x8815;
pub const RGB32UI: GLenum = 0x8D71;
pub const RGB32I: GLenum = 0x8D83;
pub const RGB9_E5: GLenum = 0x8C3D;
pub const R11F_G11F_B10F: GLenum = 0x8C3A;
pub const RGBA4: GLenum = 0x8056;
pub const RGB5_A1: GLenum = 0x8057;
pub const RGBA8: GLenum = 0x8058;
pub const SRGB8_ALPHA8: GLenum = 0x8C43;
pub const RGBA8_SNORM: GLenum = 0x8F97;
pub const RGBA8UI: GLenum = 0x8D7C;
pub const RGBA8I: GLenum = 0x8D8E;
pub const RGB10_A2: GLenum = 0x8059;
pub const RGB10_A2UI: GLenum = 0x906F;
pub const RGBA16: GLenum = 0x805B;
pub const RGBA16_SNORM: GLenum = 0x8F9B;
pub const RGBA16F: GLenum = 0x881A;
pub const RGBA16UI: GLenum = 0x8D76;
pub const RGBA16I: GLenum = 0x8D88;
pub const RGBA32F: GLenum = 0x8814;
pub const RGBA32UI: GLenum = 0x8D70;
pub const RGBA32I: GLenum = 0x8D82;
pub const DEPTH_COMPONENT16: GLenum = 0x81A5;
pub const DEPTH_COMPONENT24: GLenum = 0x81A6;
pub const DEPTH_COMPONENT32F: GLenum = 0x8CAC;
pub const DEPTH24_STENCIL8: GLenum = 0x88F0;
pub const DEPTH32F_STENCIL8: GLenum = 0x8CAD;
pub const STENCIL_INDEX8: GLenum = 0x8D48;
pub const COMPRESSED_RGBA_S3TC_DXT1_EXT: GLenum = 0x83F1;
pub const COMPRESSED_RGBA_S3TC_DXT3_EXT: GLenum = 0x83F2;
pub const COMPRESSED_RGBA_S3TC_DXT5_EXT: GLenum = 0x83F3;
pub const COMPRESSED_SRGB_ALPHA_S3TC_DXT1_EXT: GLenum = 0x8C4D;
pub const COMPRESSED_SRGB_ALPHA_S3TC_DXT3_EXT: GLenum = 0x8C4E;
pub const COMPRESSED_SRGB_ALPHA_S3TC_DXT5_EXT: GLenum = 0x8C4F;
pub const COMPRESSED_RED_RGTC1: GLenum = 0x8DBB;
pub const COMPRESSED_SIGNED_RED_RGTC1: GLenum = 0x8DBC;
pub const COMPRESSED_RG_RGTC2: GLenum = 0x8DBD;
pub const COMPRESSED_SIGNED_RG_RGTC2: GLenum = 0x8DBE;
pub const COMPRESSED_RGBA_BPTC_UNORM: GLenum = 0x8E8C;
pub const COMPRESSED_SRGB_ALPHA_BPTC_UNORM: GLenum = 0x8E8D;
pub const COMPRESSED_RGB_BPTC_SIGNED_FLOAT: GLenum = 0x8E8E;
pub const COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT: GLenum = 0x8E8F;

/// Returns `true` for the targets texture names can be bound to.
pub fn is_texture_target(target: GLenum) -> bool {
    matches!(
        target,
        TEXTURE_1D
            | TEXTURE_2D
            | TEXTURE_3D
            | TEXTURE_1D_ARRAY
            | TEXTURE_2D_ARRAY
            | TEXTURE_RECTANGLE
            | TEXTURE_CUBE_MAP
            | TEXTURE_CUBE_MAP_ARRAY
            | TEXTURE_2D_MULTISAMPLE
            | TEXTURE_2D_MULTISAMPLE_ARRAY
            | TEXTURE_BUFFER
    )
}

/// Returns `true` for the targets buffer names can be bound to.
pub fn is_buffer_target(target: GLenum) -> bool {
    matches!(
        target,
        ARRAY_BUFFER
            | ELEMENT_ARRAY_BUFFER
            | PIXEL_PACK_BUFFER
            | PIXEL_UNPACK_BUFFER
            | UNIFORM_BUFFER
            | SHADER_STORAGE_BUFFER
            | COPY_READ_BUFFER
            | COPY_WRITE_BUFFER
            | DRAW_INDIRECT_BUFFER
            | DISPATCH_INDIRECT_BUFFER
            | TRANSFORM_FEEDBACK_BUFFER
    )
}
