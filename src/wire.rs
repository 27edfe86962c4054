//!
//! Binary encoding used on the state-history socket.
//!
//! Integers are little endian, lengths and variant tags are LEB128
//! `varuint32`, optionals carry a one byte presence flag and vectors are
//! prefixed with their element count.
//!

use crate::error::ProtocolError;

pub type Checksum256 = [u8; 32];

pub struct BinReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BinReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, ProtocolError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn read_i128(&mut self) -> Result<i128, ProtocolError> {
        Ok(i128::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    pub fn read_varuint32(&mut self) -> Result<u32, ProtocolError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            if shift >= 35 {
                return Err(ProtocolError::VarintOverflow);
            }
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        result.try_into().map_err(|_| ProtocolError::VarintOverflow)
    }

    /// zig-zag encoded
    pub fn read_varint32(&mut self) -> Result<i32, ProtocolError> {
        let v = self.read_varuint32()?;
        Ok(((v >> 1) as i32) ^ -((v & 1) as i32))
    }

    pub fn read_checksum256(&mut self) -> Result<Checksum256, ProtocolError> {
        self.read_array()
    }

    /// varuint32 length followed by the raw bytes
    pub fn read_blob(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_varuint32()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

#[derive(Default, Debug)]
pub struct BinWriter {
    bytes: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        BinWriter::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.bytes.push(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_varuint32(&mut self, mut v: u32) {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.bytes.push(byte);
            if v == 0 {
                break;
            }
        }
    }

    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_varuint32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }
}

pub trait BinSerialize {
    fn write_bin(&self, writer: &mut BinWriter);

    fn serialize(&self) -> Vec<u8> {
        let mut writer = BinWriter::new();
        self.write_bin(&mut writer);
        writer.into_bytes()
    }
}

pub trait BinDeserialize: Sized {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError>;

    fn deserialize(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::read_bin(&mut BinReader::new(bytes))
    }
}

impl BinSerialize for bool {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_bool(*self);
    }
}

impl BinDeserialize for bool {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        reader.read_bool()
    }
}

impl BinSerialize for u32 {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_u32(*self);
    }
}

impl BinDeserialize for u32 {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        reader.read_u32()
    }
}

impl BinSerialize for Checksum256 {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_bytes(self);
    }
}

impl BinDeserialize for Checksum256 {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        reader.read_checksum256()
    }
}

impl<T: BinSerialize> BinSerialize for Option<T> {
    fn write_bin(&self, writer: &mut BinWriter) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write_bin(writer);
            }
            None => writer.write_bool(false),
        }
    }
}

impl<T: BinDeserialize> BinDeserialize for Option<T> {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        if reader.read_bool()? {
            Ok(Some(T::read_bin(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: BinSerialize> BinSerialize for Vec<T> {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_varuint32(self.len() as u32);
        for item in self {
            item.write_bin(writer);
        }
    }
}

impl<T: BinDeserialize> BinDeserialize for Vec<T> {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        let len = reader.read_varuint32()? as usize;
        // every element takes at least one byte, so a count larger than what
        // is left can only come from a corrupt frame
        let mut items = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            items.push(T::read_bin(reader)?);
        }
        Ok(items)
    }
}

/// Raw byte payloads (`bytes` in the schema) as carried inside results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes(pub Vec<u8>);

impl BinSerialize for Bytes {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_blob(&self.0);
    }
}

impl BinDeserialize for Bytes {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        Ok(Bytes(reader.read_blob()?.to_vec()))
    }
}
