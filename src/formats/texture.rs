//! Texture decoding shared by the format loaders.
//!
//! Images arrive as raw encoded bytes (embedded buffer views), base64 data
//! URLs, or files next to the source scene.
//!
//! # Examples
//! ```
//! use community_render::formats::texture::load_texture_from_data_url;
//!
//! let data_url = "data:image/png;base64,\
//! iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAAEElEQVR4AQEFAPr/AP////8J+wP9o9FJCgAAAABJRU5ErkJggg==";
//! let texture = load_texture_from_data_url(data_url);
//! assert!(texture.is_some());
//! ```

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use image::GenericImageView;

use crate::scene::TextureData;

/// Decodes the payload of a `data:` URI. Returns `None` for anything else.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    if !uri.starts_with("data:") {
        return None;
    }
    let comma_pos = uri.find(',')?;
    base64::engine::general_purpose::STANDARD
        .decode(&uri[(comma_pos + 1)..])
        .ok()
}

/// Decodes PNG/JPEG bytes to RGBA pixels.
pub fn decode_image_bytes(bytes: &[u8]) -> Option<Arc<TextureData>> {
    let img = image::load_from_memory(bytes).ok()?;
    let (width, height) = img.dimensions();
    Some(Arc::new(TextureData {
        width,
        height,
        data: img.to_rgba8().into_raw(),
    }))
}

/// Loads a texture from a base64-encoded data URL such as
/// `data:image/png;base64,<encoded_data>`.
pub fn load_texture_from_data_url(source: &str) -> Option<Arc<TextureData>> {
    decode_data_uri(source).and_then(|bytes| decode_image_bytes(&bytes))
}

/// Loads a texture from disk. Missing or undecodable files log at debug level.
pub fn load_texture_from_file(path: &Path) -> Option<Arc<TextureData>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let texture = decode_image_bytes(&bytes);
            if texture.is_none() {
                tracing::debug!(path = %path.display(), "Undecodable texture");
            }
            texture
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Texture not readable");
            None
        }
    }
}
