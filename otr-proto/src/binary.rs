//! Big-endian primitive field readers/writers for OTR's binary message body
//! (the part that travels base64-encoded inside the `?OTR:...` envelope).

use crate::error::ProtoError;

#[derive(Default)]
pub struct Writer(Vec<u8>);

impl Writer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn byte(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn short(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn int(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn long_top_half(&mut self, v: u64) -> &mut Self {
        // OTR's CTR field on the wire is the top 8 bytes of a 16-byte
        // counter; we already track only the top half internally (see
        // otr-crypto::aes_ctr), so this just writes it as 8 raw bytes.
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// MPI: 4-byte big-endian length prefix, then that many bytes, with
    /// leading zero bytes stripped (as OTR's MPI encoding requires).
    pub fn mpi(&mut self, bytes: &[u8]) -> &mut Self {
        let trimmed = {
            let mut i = 0;
            while i < bytes.len() - 1 && bytes[i] == 0 {
                i += 1;
            }
            &bytes[i..]
        };
        self.int(trimmed.len() as u32);
        self.0.extend_from_slice(trimmed);
        self
    }

    /// DATA: 4-byte big-endian length prefix, then that many bytes.
    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        self.int(bytes.len() as u32);
        self.0.extend_from_slice(bytes);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn byte(&mut self) -> Result<u8, ProtoError> {
        let b = *self.buf.get(self.pos).ok_or(ProtoError::UnexpectedEof("byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn short(&mut self) -> Result<u16, ProtoError> {
        let bytes = self.take(2, "short")?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn int(&mut self) -> Result<u32, ProtoError> {
        let bytes = self.take(4, "int")?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn long_top_half(&mut self) -> Result<u64, ProtoError> {
        let bytes = self.take(8, "ctr")?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn mpi(&mut self) -> Result<Vec<u8>, ProtoError> {
        let len = self.int()? as usize;
        Ok(self.take(len, "mpi")?.to_vec())
    }

    pub fn data(&mut self) -> Result<Vec<u8>, ProtoError> {
        let len = self.int()? as usize;
        Ok(self.take(len, "data")?.to_vec())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtoError> {
        self.take(n, "skip")?;
        Ok(())
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ProtoError> {
        if self.pos + n > self.buf.len() {
            return Err(ProtoError::UnexpectedEof(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}
