use crate::error::DecodeError;
use image::codecs::png::PngDecoder;
use image::{ColorType, ImageDecoder};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tessera_assets::prelude::*;

/// Pixel layout of a decoded [`Image`], 16 bit channels are stored in native byte order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb8,
    Rgb16,
    Rgba8,
    Rgba16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgb16 => 6,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16 => 8,
        }
    }

    fn from_color(color: ColorType) -> Result<Self, DecodeError> {
        match color {
            ColorType::Rgb8 => Ok(PixelFormat::Rgb8),
            ColorType::Rgb16 => Ok(PixelFormat::Rgb16),
            ColorType::Rgba8 => Ok(PixelFormat::Rgba8),
            ColorType::Rgba16 => Ok(PixelFormat::Rgba16),
            ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => {
                Err(DecodeError::UnsupportedImage("Grayscale".to_string()))
            }
            other => Err(DecodeError::UnsupportedImage(format!("{other:?}"))),
        }
    }
}

/// Decoded raster image
#[derive(Debug)]
pub struct Image {
    key: ResourceKey,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Resource for Image {
    fn key(&self) -> &ResourceKey {
        &self.key
    }
}

/// Loads `.png` images
pub struct ImageLoader {
    png: ResourceType,
}

impl ImageLoader {
    pub fn new(registry: &Registry) -> Self {
        Self {
            png: registry.resource_type("PNG"),
        }
    }
}

fn decode(key: &ResourceKey, input: &mut dyn Read) -> Result<Image, DecodeError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    let decoder = PngDecoder::new(Cursor::new(bytes))?;
    let format = PixelFormat::from_color(decoder.color_type())?;
    let (width, height) = decoder.dimensions();
    let total = usize::try_from(decoder.total_bytes())
        .map_err(|_| DecodeError::UnsupportedImage(format!("{width}x{height} is too large")))?;
    let mut data = vec![0u8; total];
    decoder.read_image(&mut data)?;
    Ok(Image {
        key: key.clone(),
        format,
        width,
        height,
        data,
    })
}

impl Loader for ImageLoader {
    fn supports(&self) -> Vec<ResourceType> {
        vec![self.png.clone()]
    }

    fn new_task(&self, key: &ResourceKey, stream: ByteStream) -> Result<Task, LoadError> {
        if key.resource_type() != &self.png {
            return Err(LoadError::UnsupportedType {
                key: key.clone(),
                ty: key.resource_type().clone(),
            });
        }
        Ok(Task::new(
            key.clone(),
            stream,
            |key: &ResourceKey, input: &mut dyn Read| -> LoadResult {
                let image = decode(key, input).map_err(|e| e.into_load_error(key, "Image"))?;
                tracing::trace!(
                    "Decoded {key} as {}x{} {:?}",
                    image.width,
                    image.height,
                    image.format
                );
                Ok(Arc::new(image))
            },
        ))
    }
}
