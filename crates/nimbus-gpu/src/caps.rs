use crate::types::TextureFormat;

/// Capability surface a backend advertises to callers.
///
/// Callers are expected, not required, to consult this before issuing
/// descriptors that would otherwise fail with `UnsupportedFormat` or
/// `UnsupportedFeature`.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub supports_compute: bool,
    pub max_texture_dimension_2d: u32,
    pub max_bind_groups: u32,
    pub max_color_attachments: u32,
    pub supported_formats: Vec<TextureFormat>,
}

impl Capabilities {
    pub fn supports_format(&self, format: TextureFormat) -> bool {
        self.supported_formats.contains(&format)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_compute: true,
            max_texture_dimension_2d: 8192,
            max_bind_groups: 4,
            max_color_attachments: 4,
            supported_formats: vec![
                TextureFormat::R8Unorm,
                TextureFormat::Rg8Unorm,
                TextureFormat::Rgba8Unorm,
                TextureFormat::Bgra8Unorm,
                TextureFormat::Rgba16Float,
                TextureFormat::Rgba32Float,
                TextureFormat::Depth24Plus,
                TextureFormat::Depth32Float,
            ],
        }
    }
}
