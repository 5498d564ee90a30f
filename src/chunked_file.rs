//! PNG-style chunked file container.
//!
//! CRC-32 over type+data with a big-endian length prefix, matching
//! `original_source/src/chunked-file.c`'s reader, which skips a chunk
//! with a CRC mismatch instead of failing the whole stream.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::error::FyreError;

/// A single chunk: a 4-byte type tag and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: [u8; 4],
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn type_string(&self) -> String {
        chunk_type_to_string(self.chunk_type)
    }
}

pub fn chunk_type_to_string(chunk_type: [u8; 4]) -> String {
    format!(
        "'{}'",
        chunk_type
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
            .collect::<String>()
    )
}

fn chunk_crc(chunk_type: [u8; 4], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&chunk_type);
    hasher.update(data);
    hasher.finalize()
}

/// Writes a file signature followed by a sequence of chunks.
pub struct ChunkWriter<W: Write> {
    writer: W,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(mut writer: W, signature: &[u8]) -> io::Result<ChunkWriter<W>> {
        writer.write_all(signature)?;
        Ok(ChunkWriter { writer })
    }

    pub fn write_chunk(&mut self, chunk_type: [u8; 4], data: &[u8]) -> io::Result<()> {
        self.writer.write_u32::<BigEndian>(data.len() as u32)?;
        self.writer.write_all(&chunk_type)?;
        self.writer.write_all(data)?;
        self.writer.write_u32::<BigEndian>(chunk_crc(chunk_type, data))?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Verifies that `reader` starts with exactly `signature`.
pub fn read_signature<R: Read>(reader: &mut R, signature: &[u8]) -> io::Result<bool> {
    let mut buf = vec![0u8; signature.len()];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf == signature),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reads chunks one at a time, skipping and logging any whose CRC is
/// corrupt, per the original reader's tolerance policy.
pub struct ChunkReader<R: Read> {
    reader: R,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R) -> ChunkReader<R> {
        ChunkReader { reader }
    }

    /// Reads the next valid chunk, or `Ok(None)` at a clean end of
    /// stream (EOF exactly at a chunk boundary).
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, FyreError> {
        loop {
            let length = match self.reader.read_u32::<BigEndian>() {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(FyreError::Io(e)),
            };

            let mut chunk_type = [0u8; 4];
            self.reader.read_exact(&mut chunk_type).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    FyreError::UnexpectedEnd
                } else {
                    FyreError::Io(e)
                }
            })?;

            let mut data = vec![0u8; length as usize];
            self.reader.read_exact(&mut data).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    FyreError::UnexpectedEnd
                } else {
                    FyreError::Io(e)
                }
            })?;

            let stored_crc = self.reader.read_u32::<BigEndian>().map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    FyreError::UnexpectedEnd
                } else {
                    FyreError::Io(e)
                }
            })?;

            if chunk_crc(chunk_type, &data) == stored_crc {
                return Ok(Some(Chunk { chunk_type, data }));
            }

            warn!(chunk_type = %chunk_type_to_string(chunk_type), "ignoring corrupted chunk");
        }
    }

    /// Streaming variant: invokes `callback` for every successfully
    /// read chunk until end-of-stream.
    pub fn read_all(&mut self, mut callback: impl FnMut(Chunk)) -> Result<(), FyreError> {
        while let Some(chunk) = self.next_chunk()? {
            callback(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SIG: &[u8] = b"TEST\n";

    #[test]
    fn round_trips_chunks() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut buf, SIG).unwrap();
            w.write_chunk(*b"abCd", b"hello").unwrap();
            w.write_chunk(*b"efGh", b"").unwrap();
        }

        let mut cursor = Cursor::new(&buf[..]);
        assert!(read_signature(&mut cursor, SIG).unwrap());

        let mut reader = ChunkReader::new(cursor);
        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.chunk_type, *b"abCd");
        assert_eq!(c1.data, b"hello");

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.chunk_type, *b"efGh");
        assert_eq!(c2.data, b"" as &[u8]);

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn skips_corrupt_chunk_and_continues() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut buf, SIG).unwrap();
            w.write_chunk(*b"bad1", b"corrupt me").unwrap();
            w.write_chunk(*b"good", b"fine").unwrap();
        }

        // Corrupt the first chunk's CRC (last 4 bytes of that chunk).
        let first_chunk_end = SIG.len() + 4 + 4 + "corrupt me".len() + 4;
        buf[first_chunk_end - 1] ^= 0xFF;

        let mut cursor = Cursor::new(&buf[..]);
        assert!(read_signature(&mut cursor, SIG).unwrap());
        let mut reader = ChunkReader::new(cursor);

        let chunks: Vec<_> = {
            let mut out = Vec::new();
            reader.read_all(|c| out.push(c)).unwrap();
            out
        };

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, *b"good");
    }

    #[test]
    fn rejects_wrong_signature() {
        let mut cursor = Cursor::new(b"NOPE\n".to_vec());
        assert!(!read_signature(&mut cursor, SIG).unwrap());
    }
}
