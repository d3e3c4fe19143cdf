use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

/// Upper bound accepted for a length-prefixed string on decode. Anything
/// larger is treated as stream corruption rather than a legal name.
pub const MAX_STRING_LEN: usize = 4096;

/// Upper bound accepted for a pipeline vector on decode. The configured
/// replica count is far below this; the cap only guards the parser.
pub const MAX_PIPELINE_WIRE_LEN: usize = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WireError {
    /// Not enough bytes buffered for a complete message. Nothing was
    /// consumed; retry once more data has arrived.
    Wait,
    /// The 4-byte discriminator does not name a message of this protocol.
    UnknownType(u32),
    /// A length field (string or pipeline) is outside its legal range.
    BadLength(u32),
}

/// A message that can be framed onto a byte stream. `decode` parses a prefix
/// of `buf` and reports how many bytes the complete message occupied;
/// `WireError::Wait` means the prefix is incomplete and nothing may be
/// consumed yet.
pub trait Message: Sized {
    fn encode<W: Write>(&self, stream: &mut W) -> io::Result<()>;

    fn decode(buf: &[u8]) -> Result<(Self, usize), WireError>;

    /// Number of opaque payload bytes that follow this message on the same
    /// stream. Non-zero only for the bulk-data header.
    fn bulk_len(&self) -> usize {
        0
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes).expect("Error encoding message");
        bytes
    }
}

/// Cursor over a byte slice that yields `WireError::Wait` on underrun, so a
/// partially arrived message unwinds without consuming anything.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    /// Total bytes consumed so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        if self.buf.len() - self.pos < 4 {
            return Err(WireError::Wait);
        }
        let mut slice = &self.buf[self.pos..];
        let value = slice.read_u32::<BigEndian>().map_err(|_| WireError::Wait)?;
        self.pos += 4;
        Ok(value)
    }

    /// Booleans travel as u32; any non-zero value decodes as true.
    pub fn flag(&mut self) -> Result<bool, WireError> {
        Ok(self.u32()? != 0)
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        let len = self.u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(WireError::BadLength(len as u32));
        }
        if self.buf.len() - self.pos < len {
            return Err(WireError::Wait);
        }
        let raw = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        String::from_utf8(raw).map_err(|_| WireError::BadLength(len as u32))
    }

    pub fn pipeline(&mut self) -> Result<Vec<u32>, WireError> {
        let len = self.u32()? as usize;
        if len == 0 || len > MAX_PIPELINE_WIRE_LEN {
            return Err(WireError::BadLength(len as u32));
        }
        let mut ips = Vec::with_capacity(len);
        for _ in 0..len {
            ips.push(self.u32()?);
        }
        Ok(ips)
    }
}

pub(crate) fn put_flag<W: Write>(stream: &mut W, value: bool) -> io::Result<()> {
    stream.write_u32::<BigEndian>(if value { 1 } else { 0 })
}

pub(crate) fn put_string<W: Write>(stream: &mut W, value: &str) -> io::Result<()> {
    stream.write_u32::<BigEndian>(value.len() as u32)?;
    stream.write_all(value.as_bytes())
}

pub(crate) fn put_pipeline<W: Write>(stream: &mut W, ips: &[u32]) -> io::Result<()> {
    stream.write_u32::<BigEndian>(ips.len() as u32)?;
    for ip in ips {
        stream.write_u32::<BigEndian>(*ip)?;
    }
    Ok(())
}
