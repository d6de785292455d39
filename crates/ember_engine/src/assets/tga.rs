//! TGA image codec
//!
//! Decodes true-color Targa files, raw (type 2) and run-length encoded
//! (type 10), to tightly packed RGBA8. Pixels are stored BGR(A) on disk and
//! swizzled on decode. The encoders exist for tooling and tests.

use crate::assets::{AssetError, AssetResult};

const HEADER_LEN: usize = 18;
const TYPE_RAW_TRUE_COLOR: u8 = 2;
const TYPE_RLE_TRUE_COLOR: u8 = 10;
// Image descriptor bit 5: rows are stored top to bottom.
const DESCRIPTOR_TOP_LEFT: u8 = 0x20;

/// Decoded image, tightly packed RGBA8 rows from the top
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TgaImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixel data, `width * height * 4` bytes
    pub pixels: Vec<u8>,
}

struct Header {
    id_length: u8,
    color_map_type: u8,
    data_type_code: u8,
    color_map_length: u16,
    color_map_depth: u8,
    width: u16,
    height: u16,
    bits_per_pixel: u8,
    image_descriptor: u8,
}

impl Header {
    fn parse(bytes: &[u8]) -> AssetResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(AssetError::Malformed(format!(
                "TGA header truncated: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            id_length: bytes[0],
            color_map_type: bytes[1],
            data_type_code: bytes[2],
            color_map_length: u16::from_le_bytes([bytes[5], bytes[6]]),
            color_map_depth: bytes[7],
            width: u16::from_le_bytes([bytes[12], bytes[13]]),
            height: u16::from_le_bytes([bytes[14], bytes[15]]),
            bits_per_pixel: bytes[16],
            image_descriptor: bytes[17],
        })
    }

    /// Offset of the pixel data: header, then id field, then color map
    fn pixel_data_offset(&self) -> usize {
        let color_map_bytes =
            self.color_map_length as usize * (usize::from(self.color_map_depth) / 8);
        HEADER_LEN + self.id_length as usize + color_map_bytes
    }
}

/// Decode a TGA file to RGBA8
pub fn decode(bytes: &[u8]) -> AssetResult<TgaImage> {
    let header = Header::parse(bytes)?;

    if header.color_map_type != 0 {
        return Err(AssetError::UnsupportedFormat(
            "color-mapped TGA".to_string(),
        ));
    }
    let bytes_per_pixel = match header.bits_per_pixel {
        24 => 3,
        32 => 4,
        bpp => {
            return Err(AssetError::UnsupportedFormat(format!(
                "{bpp}-bit TGA (only 24 and 32 supported)"
            )))
        }
    };

    let width = header.width as usize;
    let height = header.height as usize;
    let pixel_count = width * height;
    let data = bytes
        .get(header.pixel_data_offset()..)
        .ok_or_else(|| AssetError::Malformed("TGA pixel data missing".to_string()))?;

    let mut pixels = Vec::with_capacity(pixel_count * 4);
    match header.data_type_code {
        TYPE_RAW_TRUE_COLOR => decode_raw(data, pixel_count, bytes_per_pixel, &mut pixels)?,
        TYPE_RLE_TRUE_COLOR => decode_rle(data, pixel_count, bytes_per_pixel, &mut pixels)?,
        code => {
            return Err(AssetError::UnsupportedFormat(format!(
                "TGA data type {code}"
            )))
        }
    }

    // Bottom-left origin unless the descriptor says top-left.
    if header.image_descriptor & DESCRIPTOR_TOP_LEFT == 0 {
        flip_rows(&mut pixels, width, height);
    }

    Ok(TgaImage {
        width: header.width as u32,
        height: header.height as u32,
        pixels,
    })
}

fn push_rgba(out: &mut Vec<u8>, pixel: &[u8], bytes_per_pixel: usize) {
    // Disk order is BGR(A).
    out.push(pixel[2]);
    out.push(pixel[1]);
    out.push(pixel[0]);
    out.push(if bytes_per_pixel == 4 { pixel[3] } else { 0xFF });
}

fn decode_raw(
    data: &[u8],
    pixel_count: usize,
    bytes_per_pixel: usize,
    out: &mut Vec<u8>,
) -> AssetResult<()> {
    let needed = pixel_count * bytes_per_pixel;
    let data = data.get(..needed).ok_or_else(|| {
        AssetError::Malformed(format!(
            "TGA raw data truncated: {} of {} bytes",
            data.len(),
            needed
        ))
    })?;
    for pixel in data.chunks_exact(bytes_per_pixel) {
        push_rgba(out, pixel, bytes_per_pixel);
    }
    Ok(())
}

fn decode_rle(
    data: &[u8],
    pixel_count: usize,
    bytes_per_pixel: usize,
    out: &mut Vec<u8>,
) -> AssetResult<()> {
    let mut cursor = 0usize;
    let mut decoded = 0usize;

    while decoded < pixel_count {
        let packet = *data.get(cursor).ok_or_else(|| {
            AssetError::Malformed("TGA RLE stream truncated at packet header".to_string())
        })?;
        cursor += 1;
        let run_length = (packet & 0x7F) as usize + 1;

        if packet & 0x80 != 0 {
            // Run packet: one pixel repeated.
            let pixel = data.get(cursor..cursor + bytes_per_pixel).ok_or_else(|| {
                AssetError::Malformed("TGA RLE run truncated".to_string())
            })?;
            cursor += bytes_per_pixel;
            for _ in 0..run_length {
                push_rgba(out, pixel, bytes_per_pixel);
            }
        } else {
            // Literal packet: run_length distinct pixels.
            let len = run_length * bytes_per_pixel;
            let literal = data.get(cursor..cursor + len).ok_or_else(|| {
                AssetError::Malformed("TGA RLE literal truncated".to_string())
            })?;
            cursor += len;
            for pixel in literal.chunks_exact(bytes_per_pixel) {
                push_rgba(out, pixel, bytes_per_pixel);
            }
        }
        decoded += run_length;
    }

    if decoded != pixel_count {
        return Err(AssetError::Malformed(format!(
            "TGA RLE stream decoded {decoded} pixels, expected {pixel_count}"
        )));
    }
    Ok(())
}

fn flip_rows(pixels: &mut [u8], width: usize, height: usize) {
    let row_len = width * 4;
    for row in 0..height / 2 {
        let (top, bottom) = pixels.split_at_mut((height - row - 1) * row_len);
        top[row * row_len..(row + 1) * row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

fn header_bytes(image: &TgaImage, data_type_code: u8) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[2] = data_type_code;
    header[12..14].copy_from_slice(&(image.width as u16).to_le_bytes());
    header[14..16].copy_from_slice(&(image.height as u16).to_le_bytes());
    header[16] = 32;
    header[17] = DESCRIPTOR_TOP_LEFT;
    header
}

/// Encode as an uncompressed 32-bit type 2 file
pub fn encode_raw(image: &TgaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + image.pixels.len());
    out.extend_from_slice(&header_bytes(image, TYPE_RAW_TRUE_COLOR));
    for pixel in image.pixels.chunks_exact(4) {
        out.extend_from_slice(&[pixel[2], pixel[1], pixel[0], pixel[3]]);
    }
    out
}

/// Encode as a run-length-encoded 32-bit type 10 file
pub fn encode_rle(image: &TgaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + image.pixels.len());
    out.extend_from_slice(&header_bytes(image, TYPE_RLE_TRUE_COLOR));

    let pixels: Vec<&[u8]> = image.pixels.chunks_exact(4).collect();
    let mut i = 0usize;
    while i < pixels.len() {
        // Count the run of identical pixels starting here, up to the
        // 128-pixel packet limit.
        let mut run = 1usize;
        while i + run < pixels.len() && run < 128 && pixels[i + run] == pixels[i] {
            run += 1;
        }

        if run > 1 {
            out.push(0x80 | (run as u8 - 1));
            let p = pixels[i];
            out.extend_from_slice(&[p[2], p[1], p[0], p[3]]);
            i += run;
        } else {
            // Gather distinct pixels into one literal packet.
            let start = i;
            let mut len = 1usize;
            while start + len < pixels.len()
                && len < 128
                && (start + len + 1 >= pixels.len()
                    || pixels[start + len] != pixels[start + len + 1])
            {
                len += 1;
            }
            out.push(len as u8 - 1);
            for p in &pixels[start..start + len] {
                out.extend_from_slice(&[p[2], p[1], p[0], p[3]]);
            }
            i = start + len;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> TgaImage {
        TgaImage {
            width: 2,
            height: 2,
            pixels: vec![
                255, 0, 0, 255, // red
                0, 255, 0, 255, // green
                0, 0, 255, 255, // blue
                255, 255, 255, 128, // translucent white
            ],
        }
    }

    #[test]
    fn rle_decode_matches_raw_decode_on_2x2_rgba() {
        let image = test_image();
        let raw = decode(&encode_raw(&image)).unwrap();
        let rle = decode(&encode_rle(&image)).unwrap();
        assert_eq!(raw.pixels.len(), 16);
        assert_eq!(raw, rle);
        assert_eq!(raw, image);
    }

    #[test]
    fn run_packets_expand_to_repeated_pixels() {
        // 4x1 image, all one color, as a single run packet.
        let mut bytes = Vec::new();
        let image = TgaImage {
            width: 4,
            height: 1,
            pixels: vec![10, 20, 30, 255].repeat(4),
        };
        bytes.extend_from_slice(&header_bytes(&image, TYPE_RLE_TRUE_COLOR));
        bytes.push(0x83); // run of 4
        bytes.extend_from_slice(&[30, 20, 10, 255]); // BGRA

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn bottom_left_origin_is_flipped_on_decode() {
        let image = test_image();
        let mut bytes = encode_raw(&image);
        bytes[17] = 0; // claim bottom-left origin

        let decoded = decode(&bytes).unwrap();
        // Rows come out swapped relative to the stored order.
        assert_eq!(&decoded.pixels[0..8], &image.pixels[8..16]);
        assert_eq!(&decoded.pixels[8..16], &image.pixels[0..8]);
    }

    #[test]
    fn truncated_pixel_data_is_malformed() {
        let image = test_image();
        let mut bytes = encode_raw(&image);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(decode(&bytes), Err(AssetError::Malformed(_))));
    }

    #[test]
    fn unsupported_data_type_is_rejected() {
        let image = test_image();
        let mut bytes = encode_raw(&image);
        bytes[2] = 3; // grayscale
        assert!(matches!(
            decode(&bytes),
            Err(AssetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn twenty_four_bit_pixels_gain_opaque_alpha() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[
            0, 0, TYPE_RAW_TRUE_COLOR, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
            1, 0, 1, 0, 24, DESCRIPTOR_TOP_LEFT,
        ]);
        bytes.extend_from_slice(&[30, 20, 10]); // BGR

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.pixels, vec![10, 20, 30, 255]);
    }
}
