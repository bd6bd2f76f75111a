//! Length-prefixed record framing.
//!
//! Every on-disk artifact is a concatenation of records: a `u32`
//! little-endian payload length followed by that many bytes of message
//! payload. Readers stop cleanly at end of stream and reject implausible
//! lengths rather than allocating them.

use std::io::{Read, Write};

use crate::{IoError, Result};

/// Upper bound on a single record payload. Large enough for any frame-sized
/// patch record, small enough to catch corrupt length prefixes.
const MAX_RECORD_LEN: u32 = 1 << 30;

/// Write one length-prefixed record.
pub fn write_record<W: Write>(out: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| IoError::InvalidData(format!("record of {} bytes", payload.len())))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

/// Read one length-prefixed record. Returns `None` at a clean end of stream.
pub fn read_record<R: Read>(input: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match input.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_RECORD_LEN {
        return Err(IoError::Parse(format!("record length {} exceeds limit", len)));
    }

    let mut payload = vec![0u8; len as usize];
    input
        .read_exact(&mut payload)
        .map_err(|e| IoError::Parse(format!("truncated record: {}", e)))?;
    Ok(Some(payload))
}

/// Cursor over a record payload with checked little-endian field reads.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(IoError::Parse("message field past end of record".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// All fields must be consumed; trailing bytes mean a format mismatch.
    pub fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(IoError::Parse(format!(
                "{} trailing bytes in record",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Builder for a record payload.
#[derive(Default)]
pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }
}
