//! CDF bitmap fonts.
//!
//! A CDF file is a sequence of big-endian `i32`s:
//!
//! | Section   | Contents                                                             |
//! |-----------|----------------------------------------------------------------------|
//! | signature | `CDF`                                                                |
//! | header    | `HDR`, size, width, height, line, space, glyph count, kerning count  |
//! | glyphs    | `CHR`, then per glyph code, x, y, width, height, x/y offset, advance |
//! | kernings  | `KRN`, then per pair previous code, code, offset                     |
//! | atlas     | `IMG`, then width * height packed pixels                             |
//! | footer    | `FTR`                                                                |

use crate::error::DecodeError;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tessera_assets::prelude::*;

const CDF: i32 = 0x676870;
const HDR: i32 = 0x726882;
const CHR: i32 = 0x677282;
const KRN: i32 = 0x758278;
const IMG: i32 = 0x737771;
const FTR: i32 = 0x708482;

/// Placement of one character inside the atlas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub code: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub x_offset: i32,
    pub y_offset: i32,
    pub advance: i32,
    /// Previous character code to horizontal offset
    kernings: HashMap<i32, i32>,
}

impl Glyph {
    /// Horizontal adjustment when this glyph follows `previous`
    pub fn kerning(&self, previous: i32) -> i32 {
        self.kernings.get(&previous).copied().unwrap_or(0)
    }

    /// Quad corners as xyz triples: top left, top right, bottom right, bottom left
    pub fn vertices(&self, x: i32, y: i32, scale: f32) -> [f32; 12] {
        let left = self.x_offset as f32 * scale + x as f32;
        let right = (self.width + self.x_offset) as f32 * scale + x as f32;
        let top = (self.height + self.y_offset) as f32 * scale + y as f32;
        let bottom = self.y_offset as f32 * scale + y as f32;
        [
            left, top, 0.0, //
            right, top, 0.0, //
            right, bottom, 0.0, //
            left, bottom, 0.0,
        ]
    }

    /// Atlas coordinates in the same corner order as [`Glyph::vertices`]
    pub fn coordinates(&self) -> [f32; 8] {
        let (left, right) = (self.x as f32, (self.x + self.width) as f32);
        let (bottom, top) = (self.y as f32, (self.y + self.height) as f32);
        [left, top, right, top, right, bottom, left, bottom]
    }

    /// Two triangles covering the quad whose first vertex is `offset`
    pub fn indices(offset: u32) -> [u32; 6] {
        [
            3 + offset,
            offset,
            1 + offset,
            1 + offset,
            2 + offset,
            3 + offset,
        ]
    }
}

/// Bitmap font with its glyph atlas
#[derive(Debug)]
pub struct Font {
    key: ResourceKey,
    pub size: i32,
    pub width: i32,
    pub height: i32,
    pub line: i32,
    pub space: i32,
    /// `width * height` packed pixels
    pub atlas: Vec<u32>,
    glyphs: HashMap<i32, Glyph>,
}

impl Font {
    pub fn glyph(&self, code: i32) -> Option<&Glyph> {
        self.glyphs.get(&code)
    }

    pub fn has_glyph(&self, code: i32) -> bool {
        self.glyphs.contains_key(&code)
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    /// Atlas pixels as raw bytes, in native byte order
    pub fn atlas_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.atlas)
    }
}

impl Resource for Font {
    fn key(&self) -> &ResourceKey {
        &self.key
    }
}

struct CdfReader<'a> {
    input: &'a mut dyn Read,
}

impl CdfReader<'_> {
    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let mut bytes = [0u8; 4];
        self.input.read_exact(&mut bytes)?;
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[i32; N], DecodeError> {
        let mut ints = [0i32; N];
        for int in ints.iter_mut() {
            *int = self.read_i32()?;
        }
        Ok(ints)
    }

    fn expect_tag(&mut self, tag: i32, missing: DecodeError) -> Result<(), DecodeError> {
        if self.read_i32()? == tag {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

fn count(value: i32) -> Result<usize, DecodeError> {
    usize::try_from(value).map_err(|_| DecodeError::InvalidHeader)
}

fn decode(key: &ResourceKey, input: &mut dyn Read) -> Result<Font, DecodeError> {
    let mut reader = CdfReader { input };
    reader.expect_tag(CDF, DecodeError::InvalidSignature)?;
    reader.expect_tag(HDR, DecodeError::InvalidHeader)?;
    let [size, width, height, line, space, glyph_count, kerning_count] = reader.read_array::<7>()?;
    let glyph_count = count(glyph_count)?;
    let kerning_count = count(kerning_count)?;
    let pixels = count(width)?
        .checked_mul(count(height)?)
        .ok_or(DecodeError::InvalidHeader)?;

    reader.expect_tag(CHR, DecodeError::MissingSection("glyph"))?;
    let mut glyphs = HashMap::with_capacity(glyph_count.min(1024));
    for _ in 0..glyph_count {
        let [code, x, y, width, height, x_offset, y_offset, advance] = reader.read_array::<8>()?;
        glyphs.insert(
            code,
            Glyph {
                code,
                x,
                y,
                width,
                height,
                x_offset,
                y_offset,
                advance,
                kernings: HashMap::new(),
            },
        );
    }

    reader.expect_tag(KRN, DecodeError::MissingSection("kerning"))?;
    for _ in 0..kerning_count {
        let [previous, code, offset] = reader.read_array::<3>()?;
        glyphs
            .get_mut(&code)
            .ok_or(DecodeError::UnknownGlyph(code))?
            .kernings
            .insert(previous, offset);
    }

    reader.expect_tag(IMG, DecodeError::MissingSection("image"))?;
    let mut atlas = Vec::with_capacity(pixels.min(1 << 20));
    for _ in 0..pixels {
        // packed pixels keep their bit pattern
        atlas.push(reader.read_i32()? as u32);
    }

    reader.expect_tag(FTR, DecodeError::InvalidFooter)?;
    Ok(Font {
        key: key.clone(),
        size,
        width,
        height,
        line,
        space,
        atlas,
        glyphs,
    })
}

/// Loads `.cdf` fonts
pub struct FontLoader {
    cdf: ResourceType,
}

impl FontLoader {
    pub fn new(registry: &Registry) -> Self {
        Self {
            cdf: registry.resource_type("CDF"),
        }
    }
}

impl Loader for FontLoader {
    fn supports(&self) -> Vec<ResourceType> {
        vec![self.cdf.clone()]
    }

    fn new_task(&self, key: &ResourceKey, stream: ByteStream) -> Result<Task, LoadError> {
        if key.resource_type() != &self.cdf {
            return Err(LoadError::UnsupportedType {
                key: key.clone(),
                ty: key.resource_type().clone(),
            });
        }
        Ok(Task::new(
            key.clone(),
            stream,
            |key: &ResourceKey, input: &mut dyn Read| -> LoadResult {
                let font = decode(key, input).map_err(|e| e.into_load_error(key, "Font"))?;
                Ok(Arc::new(font))
            },
        ))
    }
}
