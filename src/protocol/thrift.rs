//! Minimal Thrift compact-protocol writer.
//!
//! Only the subset the CONNECT payload needs: structs, strings, bools,
//! byte/i32/i64 scalars and `list<i32>`. Field headers use the short delta
//! form when the id advances by 1..=15 and the long form otherwise.

use bytes::{BufMut, BytesMut};

/// Compact-protocol type codes.
mod compact_type {
    pub const STOP: u8 = 0x00;
    pub const BOOLEAN_TRUE: u8 = 0x01;
    pub const BOOLEAN_FALSE: u8 = 0x02;
    pub const BYTE: u8 = 0x03;
    pub const I32: u8 = 0x05;
    pub const I64: u8 = 0x06;
    pub const BINARY: u8 = 0x08;
    pub const LIST: u8 = 0x09;
    pub const STRUCT: u8 = 0x0C;
}

/// Streaming compact-protocol encoder.
#[derive(Debug, Default)]
pub struct ThriftWriter {
    buf: BytesMut,
    last_field_id: i16,
    field_id_stack: Vec<i16>,
}

impl ThriftWriter {
    /// Create an empty writer positioned at the start of the top-level struct.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a string field.
    pub fn write_string(&mut self, id: i16, value: &str) -> &mut Self {
        self.field_header(compact_type::BINARY, id);
        self.write_varint(value.len() as u64);
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Write a boolean field (value folded into the header type).
    pub fn write_bool(&mut self, id: i16, value: bool) -> &mut Self {
        let ty = if value {
            compact_type::BOOLEAN_TRUE
        } else {
            compact_type::BOOLEAN_FALSE
        };
        self.field_header(ty, id);
        self
    }

    /// Write a byte field.
    pub fn write_byte(&mut self, id: i16, value: i8) -> &mut Self {
        self.field_header(compact_type::BYTE, id);
        self.buf.put_i8(value);
        self
    }

    /// Write an i32 field.
    pub fn write_i32(&mut self, id: i16, value: i32) -> &mut Self {
        self.field_header(compact_type::I32, id);
        self.write_varint(zigzag_i32(value));
        self
    }

    /// Write an i64 field.
    pub fn write_i64(&mut self, id: i16, value: i64) -> &mut Self {
        self.field_header(compact_type::I64, id);
        self.write_varint(zigzag_i64(value));
        self
    }

    /// Write a `list<i32>` field.
    pub fn write_i32_list(&mut self, id: i16, values: &[i32]) -> &mut Self {
        self.field_header(compact_type::LIST, id);
        if values.len() < 15 {
            self.buf.put_u8(((values.len() as u8) << 4) | compact_type::I32);
        } else {
            self.buf.put_u8(0xF0 | compact_type::I32);
            self.write_varint(values.len() as u64);
        }
        for &v in values {
            self.write_varint(zigzag_i32(v));
        }
        self
    }

    /// Open a nested struct field. Close it with [`Self::end_struct`].
    pub fn begin_struct(&mut self, id: i16) -> &mut Self {
        self.field_header(compact_type::STRUCT, id);
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
        self
    }

    /// Close the innermost open struct.
    pub fn end_struct(&mut self) -> &mut Self {
        self.buf.put_u8(compact_type::STOP);
        self.last_field_id = self.field_id_stack.pop().unwrap_or(0);
        self
    }

    /// Terminate the top-level struct and return the encoded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        while !self.field_id_stack.is_empty() {
            self.end_struct();
        }
        self.buf.put_u8(compact_type::STOP);
        self.buf.to_vec()
    }

    fn field_header(&mut self, ty: u8, id: i16) {
        let delta = id - self.last_field_id;
        if (1..=15).contains(&delta) {
            self.buf.put_u8(((delta as u8) << 4) | ty);
        } else {
            self.buf.put_u8(ty);
            self.write_varint(u64::from(zigzag_i16(id)));
        }
        self.last_field_id = id;
    }

    fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }
}

fn zigzag_i16(n: i16) -> u16 {
    ((n << 1) ^ (n >> 15)) as u16
}

fn zigzag_i32(n: i32) -> u64 {
    u64::from(((n << 1) ^ (n >> 31)) as u32)
}

fn zigzag_i64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_string_field() {
        let mut w = ThriftWriter::new();
        w.write_string(1, "ab");
        assert_eq!(w.finish(), vec![0x18, 0x02, b'a', b'b', 0x00]);
    }

    #[test]
    fn test_bool_folds_into_header() {
        let mut w = ThriftWriter::new();
        w.write_bool(1, true).write_bool(2, false);
        assert_eq!(w.finish(), vec![0x11, 0x12, 0x00]);
    }

    #[test]
    fn test_long_form_header_for_large_delta() {
        let mut w = ThriftWriter::new();
        w.write_byte(21, 3);
        // type byte, zigzag(21) = 42, value, stop
        assert_eq!(w.finish(), vec![0x03, 42, 0x03, 0x00]);
    }

    #[test]
    fn test_zigzag_varints() {
        let mut w = ThriftWriter::new();
        w.write_i32(1, -1).write_i64(2, 300);
        // -1 -> 1; 300 -> 600 -> [0xD8, 0x04]
        assert_eq!(w.finish(), vec![0x15, 0x01, 0x16, 0xD8, 0x04, 0x00]);
    }

    #[test]
    fn test_i32_list() {
        let mut w = ThriftWriter::new();
        w.write_i32_list(14, &[76, 80]);
        assert_eq!(w.finish(), vec![0xE9, 0x25, 152, 1, 160, 1, 0x00]);
    }

    #[test]
    fn test_nested_struct_resets_field_ids() {
        let mut w = ThriftWriter::new();
        w.write_string(1, "")
            .begin_struct(4)
            .write_i64(1, 0)
            .end_struct()
            .write_string(5, "");
        assert_eq!(
            w.finish(),
            vec![0x18, 0x00, 0x3C, 0x16, 0x00, 0x00, 0x18, 0x00, 0x00]
        );
    }
}
