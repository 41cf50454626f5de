//! Vulkan → DXGI format translation.

use ash::vk;

/// A native (DXGI-numbered) format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DxgiFormat(pub u32);

impl DxgiFormat {
    pub const UNKNOWN: Self = Self(0);
    pub const R32G32B32A32_TYPELESS: Self = Self(1);
    pub const R32G32B32A32_FLOAT: Self = Self(2);
    pub const R32G32B32A32_UINT: Self = Self(3);
    pub const R32G32B32A32_SINT: Self = Self(4);
    pub const R32G32B32_FLOAT: Self = Self(6);
    pub const R32G32B32_UINT: Self = Self(7);
    pub const R32G32B32_SINT: Self = Self(8);
    pub const R16G16B16A16_FLOAT: Self = Self(10);
    pub const R16G16B16A16_UNORM: Self = Self(11);
    pub const R16G16B16A16_UINT: Self = Self(12);
    pub const R16G16B16A16_SNORM: Self = Self(13);
    pub const R16G16B16A16_SINT: Self = Self(14);
    pub const R32G32_FLOAT: Self = Self(16);
    pub const R32G32_UINT: Self = Self(17);
    pub const R32G32_SINT: Self = Self(18);
    pub const R32G8X24_TYPELESS: Self = Self(19);
    pub const D32_FLOAT_S8X24_UINT: Self = Self(20);
    pub const R32_FLOAT_X8X24_TYPELESS: Self = Self(21);
    pub const R10G10B10A2_UNORM: Self = Self(24);
    pub const R10G10B10A2_UINT: Self = Self(25);
    pub const R11G11B10_FLOAT: Self = Self(26);
    pub const R8G8B8A8_UNORM: Self = Self(28);
    pub const R8G8B8A8_UNORM_SRGB: Self = Self(29);
    pub const R8G8B8A8_UINT: Self = Self(30);
    pub const R8G8B8A8_SNORM: Self = Self(31);
    pub const R8G8B8A8_SINT: Self = Self(32);
    pub const R16G16_FLOAT: Self = Self(34);
    pub const R16G16_UNORM: Self = Self(35);
    pub const R16G16_UINT: Self = Self(36);
    pub const R16G16_SNORM: Self = Self(37);
    pub const R16G16_SINT: Self = Self(38);
    pub const R32_TYPELESS: Self = Self(39);
    pub const D32_FLOAT: Self = Self(40);
    pub const R32_FLOAT: Self = Self(41);
    pub const R32_UINT: Self = Self(42);
    pub const R32_SINT: Self = Self(43);
    pub const R24G8_TYPELESS: Self = Self(44);
    pub const D24_UNORM_S8_UINT: Self = Self(45);
    pub const R24_UNORM_X8_TYPELESS: Self = Self(46);
    pub const R8G8_UNORM: Self = Self(49);
    pub const R8G8_UINT: Self = Self(50);
    pub const R8G8_SNORM: Self = Self(51);
    pub const R8G8_SINT: Self = Self(52);
    pub const R16_TYPELESS: Self = Self(53);
    pub const R16_FLOAT: Self = Self(54);
    pub const D16_UNORM: Self = Self(55);
    pub const R16_UNORM: Self = Self(56);
    pub const R16_UINT: Self = Self(57);
    pub const R16_SNORM: Self = Self(58);
    pub const R16_SINT: Self = Self(59);
    pub const R8_UNORM: Self = Self(61);
    pub const R8_UINT: Self = Self(62);
    pub const R8_SNORM: Self = Self(63);
    pub const R8_SINT: Self = Self(64);
    pub const R9G9B9E5_SHAREDEXP: Self = Self(67);
    pub const BC1_UNORM: Self = Self(71);
    pub const BC1_UNORM_SRGB: Self = Self(72);
    pub const BC2_UNORM: Self = Self(74);
    pub const BC2_UNORM_SRGB: Self = Self(75);
    pub const BC3_UNORM: Self = Self(77);
    pub const BC3_UNORM_SRGB: Self = Self(78);
    pub const BC4_UNORM: Self = Self(80);
    pub const BC4_SNORM: Self = Self(81);
    pub const BC5_UNORM: Self = Self(83);
    pub const BC5_SNORM: Self = Self(84);
    pub const B5G6R5_UNORM: Self = Self(85);
    pub const B5G5R5A1_UNORM: Self = Self(86);
    pub const B8G8R8A8_UNORM: Self = Self(87);
    pub const B8G8R8A8_UNORM_SRGB: Self = Self(91);
    pub const BC6H_UF16: Self = Self(95);
    pub const BC6H_SF16: Self = Self(96);
    pub const BC7_UNORM: Self = Self(98);
    pub const BC7_UNORM_SRGB: Self = Self(99);
    pub const B4G4R4A4_UNORM: Self = Self(115);

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

/// Translate a Vulkan format. Formats without a native equivalent map to
/// [`DxgiFormat::UNKNOWN`].
pub fn to_native(format: vk::Format) -> DxgiFormat {
    use vk::Format as F;
    match format {
        F::R32G32B32A32_SFLOAT => DxgiFormat::R32G32B32A32_FLOAT,
        F::R32G32B32A32_UINT => DxgiFormat::R32G32B32A32_UINT,
        F::R32G32B32A32_SINT => DxgiFormat::R32G32B32A32_SINT,
        F::R32G32B32_SFLOAT => DxgiFormat::R32G32B32_FLOAT,
        F::R32G32B32_UINT => DxgiFormat::R32G32B32_UINT,
        F::R32G32B32_SINT => DxgiFormat::R32G32B32_SINT,
        F::R16G16B16A16_SFLOAT => DxgiFormat::R16G16B16A16_FLOAT,
        F::R16G16B16A16_UNORM => DxgiFormat::R16G16B16A16_UNORM,
        F::R16G16B16A16_UINT => DxgiFormat::R16G16B16A16_UINT,
        F::R16G16B16A16_SNORM => DxgiFormat::R16G16B16A16_SNORM,
        F::R16G16B16A16_SINT => DxgiFormat::R16G16B16A16_SINT,
        F::R32G32_SFLOAT => DxgiFormat::R32G32_FLOAT,
        F::R32G32_UINT => DxgiFormat::R32G32_UINT,
        F::R32G32_SINT => DxgiFormat::R32G32_SINT,
        F::A2B10G10R10_UNORM_PACK32 => DxgiFormat::R10G10B10A2_UNORM,
        F::A2B10G10R10_UINT_PACK32 => DxgiFormat::R10G10B10A2_UINT,
        F::B10G11R11_UFLOAT_PACK32 => DxgiFormat::R11G11B10_FLOAT,
        F::E5B9G9R9_UFLOAT_PACK32 => DxgiFormat::R9G9B9E5_SHAREDEXP,
        F::R8G8B8A8_UNORM | F::A8B8G8R8_UNORM_PACK32 => DxgiFormat::R8G8B8A8_UNORM,
        F::R8G8B8A8_SRGB | F::A8B8G8R8_SRGB_PACK32 => DxgiFormat::R8G8B8A8_UNORM_SRGB,
        F::R8G8B8A8_UINT | F::A8B8G8R8_UINT_PACK32 => DxgiFormat::R8G8B8A8_UINT,
        F::R8G8B8A8_SNORM | F::A8B8G8R8_SNORM_PACK32 => DxgiFormat::R8G8B8A8_SNORM,
        F::R8G8B8A8_SINT | F::A8B8G8R8_SINT_PACK32 => DxgiFormat::R8G8B8A8_SINT,
        F::B8G8R8A8_UNORM => DxgiFormat::B8G8R8A8_UNORM,
        F::B8G8R8A8_SRGB => DxgiFormat::B8G8R8A8_UNORM_SRGB,
        F::R16G16_SFLOAT => DxgiFormat::R16G16_FLOAT,
        F::R16G16_UNORM => DxgiFormat::R16G16_UNORM,
        F::R16G16_UINT => DxgiFormat::R16G16_UINT,
        F::R16G16_SNORM => DxgiFormat::R16G16_SNORM,
        F::R16G16_SINT => DxgiFormat::R16G16_SINT,
        F::R32_SFLOAT => DxgiFormat::R32_FLOAT,
        F::R32_UINT => DxgiFormat::R32_UINT,
        F::R32_SINT => DxgiFormat::R32_SINT,
        F::R8G8_UNORM => DxgiFormat::R8G8_UNORM,
        F::R8G8_UINT => DxgiFormat::R8G8_UINT,
        F::R8G8_SNORM => DxgiFormat::R8G8_SNORM,
        F::R8G8_SINT => DxgiFormat::R8G8_SINT,
        F::R16_SFLOAT => DxgiFormat::R16_FLOAT,
        F::R16_UNORM => DxgiFormat::R16_UNORM,
        F::R16_UINT => DxgiFormat::R16_UINT,
        F::R16_SNORM => DxgiFormat::R16_SNORM,
        F::R16_SINT => DxgiFormat::R16_SINT,
        F::R8_UNORM => DxgiFormat::R8_UNORM,
        F::R8_UINT => DxgiFormat::R8_UINT,
        F::R8_SNORM => DxgiFormat::R8_SNORM,
        F::R8_SINT => DxgiFormat::R8_SINT,
        F::R5G6B5_UNORM_PACK16 => DxgiFormat::B5G6R5_UNORM,
        F::A1R5G5B5_UNORM_PACK16 => DxgiFormat::B5G5R5A1_UNORM,
        F::B4G4R4A4_UNORM_PACK16 => DxgiFormat::B4G4R4A4_UNORM,
        F::D16_UNORM => DxgiFormat::D16_UNORM,
        F::D32_SFLOAT => DxgiFormat::D32_FLOAT,
        F::D24_UNORM_S8_UINT | F::X8_D24_UNORM_PACK32 => DxgiFormat::D24_UNORM_S8_UINT,
        F::D32_SFLOAT_S8_UINT => DxgiFormat::D32_FLOAT_S8X24_UINT,
        F::BC1_RGB_UNORM_BLOCK | F::BC1_RGBA_UNORM_BLOCK => DxgiFormat::BC1_UNORM,
        F::BC1_RGB_SRGB_BLOCK | F::BC1_RGBA_SRGB_BLOCK => DxgiFormat::BC1_UNORM_SRGB,
        F::BC2_UNORM_BLOCK => DxgiFormat::BC2_UNORM,
        F::BC2_SRGB_BLOCK => DxgiFormat::BC2_UNORM_SRGB,
        F::BC3_UNORM_BLOCK => DxgiFormat::BC3_UNORM,
        F::BC3_SRGB_BLOCK => DxgiFormat::BC3_UNORM_SRGB,
        F::BC4_UNORM_BLOCK => DxgiFormat::BC4_UNORM,
        F::BC4_SNORM_BLOCK => DxgiFormat::BC4_SNORM,
        F::BC5_UNORM_BLOCK => DxgiFormat::BC5_UNORM,
        F::BC5_SNORM_BLOCK => DxgiFormat::BC5_SNORM,
        F::BC6H_UFLOAT_BLOCK => DxgiFormat::BC6H_UF16,
        F::BC6H_SFLOAT_BLOCK => DxgiFormat::BC6H_SF16,
        F::BC7_UNORM_BLOCK => DxgiFormat::BC7_UNORM,
        F::BC7_SRGB_BLOCK => DxgiFormat::BC7_UNORM_SRGB,
        _ => DxgiFormat::UNKNOWN,
    }
}

pub fn is_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_depth_or_stencil(format: vk::Format) -> bool {
    is_depth(format) || has_stencil(format)
}

/// Integer formats cannot be filtered, blended or resolved.
pub fn is_integer(format: vk::Format) -> bool {
    let name = format!("{:?}", format);
    name.contains("UINT") || name.contains("SINT")
}

pub fn is_compressed(format: vk::Format) -> bool {
    block_extent(format) != (1, 1)
}

/// Texel block dimensions; (1, 1) for uncompressed formats.
pub fn block_extent(format: vk::Format) -> (u32, u32) {
    if (vk::Format::BC1_RGB_UNORM_BLOCK.as_raw()..=vk::Format::BC7_SRGB_BLOCK.as_raw())
        .contains(&format.as_raw())
    {
        (4, 4)
    } else {
        (1, 1)
    }
}

/// Bytes per texel block.
pub fn block_size(format: vk::Format) -> u32 {
    use vk::Format as F;
    match format {
        F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SINT | F::S8_UINT => 1,
        F::R8G8_UNORM
        | F::R8G8_SNORM
        | F::R8G8_UINT
        | F::R8G8_SINT
        | F::R16_SFLOAT
        | F::R16_UNORM
        | F::R16_SNORM
        | F::R16_UINT
        | F::R16_SINT
        | F::D16_UNORM
        | F::R5G6B5_UNORM_PACK16
        | F::A1R5G5B5_UNORM_PACK16
        | F::B4G4R4A4_UNORM_PACK16 => 2,
        F::R32G32_SFLOAT
        | F::R32G32_UINT
        | F::R32G32_SINT
        | F::R16G16B16A16_SFLOAT
        | F::R16G16B16A16_UNORM
        | F::R16G16B16A16_SNORM
        | F::R16G16B16A16_UINT
        | F::R16G16B16A16_SINT
        | F::D32_SFLOAT_S8_UINT
        | F::BC1_RGB_UNORM_BLOCK
        | F::BC1_RGB_SRGB_BLOCK
        | F::BC1_RGBA_UNORM_BLOCK
        | F::BC1_RGBA_SRGB_BLOCK
        | F::BC4_UNORM_BLOCK
        | F::BC4_SNORM_BLOCK => 8,
        F::R32G32B32_SFLOAT | F::R32G32B32_UINT | F::R32G32B32_SINT => 12,
        F::R32G32B32A32_SFLOAT
        | F::R32G32B32A32_UINT
        | F::R32G32B32A32_SINT
        | F::BC2_UNORM_BLOCK
        | F::BC2_SRGB_BLOCK
        | F::BC3_UNORM_BLOCK
        | F::BC3_SRGB_BLOCK
        | F::BC5_UNORM_BLOCK
        | F::BC5_SNORM_BLOCK
        | F::BC6H_UFLOAT_BLOCK
        | F::BC6H_SFLOAT_BLOCK
        | F::BC7_UNORM_BLOCK
        | F::BC7_SRGB_BLOCK => 16,
        _ => 4,
    }
}

/// Bytes per row of `width` texels.
pub fn row_pitch(format: vk::Format, width: u32) -> u32 {
    let (bw, _) = block_extent(format);
    width.div_ceil(bw) * block_size(format)
}

/// Storage format for a depth texture that must also be sampled.
pub fn depth_typeless(format: DxgiFormat) -> DxgiFormat {
    match format {
        DxgiFormat::D16_UNORM => DxgiFormat::R16_TYPELESS,
        DxgiFormat::D32_FLOAT => DxgiFormat::R32_TYPELESS,
        DxgiFormat::D24_UNORM_S8_UINT => DxgiFormat::R24G8_TYPELESS,
        DxgiFormat::D32_FLOAT_S8X24_UINT => DxgiFormat::R32G8X24_TYPELESS,
        other => other,
    }
}

/// Shader-resource view format reading the depth plane of a depth texture.
pub fn depth_shader_view(format: DxgiFormat) -> DxgiFormat {
    match format {
        DxgiFormat::D16_UNORM => DxgiFormat::R16_UNORM,
        DxgiFormat::D32_FLOAT => DxgiFormat::R32_FLOAT,
        DxgiFormat::D24_UNORM_S8_UINT => DxgiFormat::R24_UNORM_X8_TYPELESS,
        DxgiFormat::D32_FLOAT_S8X24_UINT => DxgiFormat::R32_FLOAT_X8X24_TYPELESS,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_colour_formats_translate() {
        assert_eq!(to_native(vk::Format::R8G8B8A8_UNORM), DxgiFormat::R8G8B8A8_UNORM);
        assert_eq!(to_native(vk::Format::B8G8R8A8_SRGB), DxgiFormat::B8G8R8A8_UNORM_SRGB);
        assert!(to_native(vk::Format::R8G8B8_UNORM).is_unknown());
    }

    #[test]
    fn depth_formats_have_typeless_and_view_variants() {
        let native = to_native(vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(depth_typeless(native), DxgiFormat::R24G8_TYPELESS);
        assert_eq!(depth_shader_view(native), DxgiFormat::R24_UNORM_X8_TYPELESS);
        assert!(is_depth(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn block_compressed_row_pitch() {
        assert_eq!(block_extent(vk::Format::BC1_RGBA_UNORM_BLOCK), (4, 4));
        assert_eq!(row_pitch(vk::Format::BC1_RGBA_UNORM_BLOCK, 10), 24);
        assert_eq!(row_pitch(vk::Format::R8G8B8A8_UNORM, 10), 40);
    }

    #[test]
    fn integer_formats_are_detected() {
        assert!(is_integer(vk::Format::R32_UINT));
        assert!(!is_integer(vk::Format::R8G8B8A8_UNORM));
    }
}
