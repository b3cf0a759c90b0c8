use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const METADATA_KEYWORD: &[u8] = b"chara";

#[derive(Debug, Error)]
pub enum CardError {
    #[error("not a png image")]
    NotPng,
    #[error("png chunk framing is corrupt")]
    CorruptChunks,
    #[error("png carries no character metadata")]
    MissingMetadata,
    #[error("character metadata is not valid base64")]
    MetadataEncoding(#[from] base64::DecodeError),
    #[error("character metadata is not valid utf-8")]
    MetadataUtf8(#[from] std::string::FromUtf8Error),
}

struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
}

struct ChunkIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<Chunk<'a>, CardError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let Some(header_end) = self.offset.checked_add(8) else {
            return Some(self.corrupt());
        };
        if header_end > self.bytes.len() {
            return Some(self.corrupt());
        }
        let length = u32::from_be_bytes(
            self.bytes[self.offset..self.offset + 4]
                .try_into()
                .unwrap_or([0; 4]),
        ) as usize;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&self.bytes[self.offset + 4..header_end]);
        let Some(data_end) = header_end.checked_add(length) else {
            return Some(self.corrupt());
        };
        let Some(chunk_end) = data_end.checked_add(4) else {
            return Some(self.corrupt());
        };
        if chunk_end > self.bytes.len() {
            return Some(self.corrupt());
        }
        let data = &self.bytes[header_end..data_end];
        self.offset = chunk_end;
        Some(Ok(Chunk { kind, data }))
    }
}

impl ChunkIter<'_> {
    fn corrupt(&mut self) -> Result<Chunk<'static>, CardError> {
        self.offset = self.bytes.len();
        Err(CardError::CorruptChunks)
    }
}

fn chunks(bytes: &[u8]) -> Result<ChunkIter<'_>, CardError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(CardError::NotPng);
    }
    Ok(ChunkIter { bytes, offset: PNG_SIGNATURE.len() })
}

fn split_text_chunk(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let null = data.iter().position(|byte| *byte == 0)?;
    Some((&data[..null], &data[null + 1..]))
}

pub fn extract_metadata(bytes: &[u8]) -> Result<String, CardError> {
    for chunk in chunks(bytes)? {
        let chunk = chunk?;
        if &chunk.kind != b"tEXt" {
            continue;
        }
        let Some((keyword, text)) = split_text_chunk(chunk.data) else {
            continue;
        };
        if keyword != METADATA_KEYWORD {
            continue;
        }
        let decoded = BASE64.decode(text)?;
        return Ok(String::from_utf8(decoded)?);
    }
    Err(CardError::MissingMetadata)
}

pub fn embed_metadata(bytes: &[u8], metadata: &str) -> Result<Vec<u8>, CardError> {
    let mut out = Vec::with_capacity(bytes.len() + metadata.len() + 64);
    out.extend_from_slice(&PNG_SIGNATURE);
    let mut inserted = false;
    for chunk in chunks(bytes)? {
        let chunk = chunk?;
        if &chunk.kind == b"tEXt" {
            if let Some((keyword, _)) = split_text_chunk(chunk.data) {
                if keyword == METADATA_KEYWORD {
                    continue;
                }
            }
        }
        if &chunk.kind == b"IEND" && !inserted {
            write_chunk(&mut out, b"tEXt", &metadata_chunk_data(metadata));
            inserted = true;
        }
        write_chunk(&mut out, &chunk.kind, chunk.data);
    }
    if !inserted {
        return Err(CardError::CorruptChunks);
    }
    Ok(out)
}

pub fn is_animated(bytes: &[u8]) -> bool {
    match chunks(bytes) {
        Ok(iter) => iter
            .filter_map(Result::ok)
            .any(|chunk| &chunk.kind == b"acTL"),
        Err(_) => false,
    }
}

fn metadata_chunk_data(metadata: &str) -> Vec<u8> {
    let encoded = BASE64.encode(metadata.as_bytes());
    let mut data = Vec::with_capacity(METADATA_KEYWORD.len() + 1 + encoded.len());
    data.extend_from_slice(METADATA_KEYWORD);
    data.push(0);
    data.extend_from_slice(encoded.as_bytes());
    data
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(kind, data).to_be_bytes());
}

fn chunk_crc(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(kind);
    crc.update(data);
    crc.sum()
}
