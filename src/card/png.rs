//! Character cards embedded in PNG `tEXt` chunks.
//!
//! Cards are stored under the `chara` keyword as base64-encoded JSON. Chunks
//! may sit before or after the image data, so the whole chunk stream is walked
//! rather than decoding pixels.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::io::Cursor;

use super::CharacterCardV2;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const TEXT_CHUNK: &[u8; 4] = b"tEXt";
const END_CHUNK: &[u8; 4] = b"IEND";

/// Keyword under which card JSON is stored.
pub const CARD_KEYWORD: &str = "chara";

struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
    /// Byte range of the whole chunk (length, type, data, crc) in the file.
    span: std::ops::Range<usize>,
}

fn chunks(bytes: &[u8]) -> Result<Vec<Chunk<'_>>> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        bail!("Not a PNG file");
    }

    let mut out = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let data_start = pos + 8;
        let end = data_start
            .checked_add(len)
            .and_then(|e| e.checked_add(4))
            .filter(|&e| e <= bytes.len())
            .with_context(|| format!("Truncated PNG chunk at offset {}", pos))?;

        let mut kind = [0u8; 4];
        kind.copy_from_slice(&bytes[pos + 4..pos + 8]);
        out.push(Chunk {
            kind,
            data: &bytes[data_start..data_start + len],
            span: pos..end,
        });

        pos = end;
        if &kind == END_CHUNK {
            return Ok(out);
        }
    }
    bail!("PNG ended before IEND chunk")
}

/// Split a `tEXt` payload into keyword and Latin-1 text.
fn parse_text(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|&b| b == 0)?;
    let latin1 = |bytes: &[u8]| bytes.iter().map(|&b| b as char).collect::<String>();
    Some((latin1(&data[..nul]), latin1(&data[nul + 1..])))
}

/// All `tEXt` chunks as `(keyword, text)` pairs, in file order.
pub fn read_text_chunks(bytes: &[u8]) -> Result<Vec<(String, String)>> {
    Ok(chunks(bytes)?
        .iter()
        .filter(|c| &c.kind == TEXT_CHUNK)
        .filter_map(|c| parse_text(c.data))
        .collect())
}

/// Decode the embedded card, or `None` when the image carries no card chunk.
pub fn decode_card(bytes: &[u8]) -> Result<Option<CharacterCardV2>> {
    let Some((_, text)) = read_text_chunks(bytes)?
        .into_iter()
        .find(|(keyword, _)| keyword == CARD_KEYWORD)
    else {
        return Ok(None);
    };

    let json = BASE64
        .decode(text.trim())
        .context("Card chunk is not valid base64")?;
    let card = serde_json::from_slice(&json).context("Card chunk is not a valid card")?;
    Ok(Some(card))
}

/// Return a copy of `bytes` carrying `card`, replacing any existing card chunk.
pub fn embed_card(bytes: &[u8], card: &CharacterCardV2) -> Result<Vec<u8>> {
    let chunks = chunks(bytes)?;

    let payload = BASE64.encode(serde_json::to_vec(card)?);
    let mut text = Vec::with_capacity(CARD_KEYWORD.len() + 1 + payload.len());
    text.extend_from_slice(CARD_KEYWORD.as_bytes());
    text.push(0);
    text.extend_from_slice(payload.as_bytes());

    let mut out = Vec::with_capacity(bytes.len() + text.len() + 12);
    out.extend_from_slice(&PNG_SIGNATURE);
    for chunk in &chunks {
        let is_card = &chunk.kind == TEXT_CHUNK
            && parse_text(chunk.data).is_some_and(|(k, _)| k == CARD_KEYWORD);
        if is_card {
            continue;
        }
        if &chunk.kind == END_CHUNK {
            write_chunk(&mut out, TEXT_CHUNK, &text);
        }
        out.extend_from_slice(&bytes[chunk.span.clone()]);
    }
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let crc = crc32(kind.iter().chain(data));
    out.extend_from_slice(&crc.to_be_bytes());
}

/// CRC-32 (ISO-HDLC) as required for PNG chunk trailers.
fn crc32<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// A small transparent PNG, used when a card has no avatar of its own.
pub fn blank_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::DynamicImage::new_rgba8(width, height);
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Re-encode arbitrary image bytes as PNG; PNG input is returned unchanged.
pub fn ensure_png(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Ok(bytes);
    }
    let img = image::load_from_memory(&bytes).context("Avatar is not a decodable image")?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
