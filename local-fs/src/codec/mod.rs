//! Binary codecs for side-car records.
//!
//! Both record kinds share the same primitive layout: big-endian integers and
//! strings written as a 16-bit big-endian byte length followed by UTF-8 bytes.

mod lock;
mod properties;

pub use lock::{LockCodec, LockRecord};
pub use properties::MetadataCodec;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::CodecError;

fn ensure(buf: &impl Buf, needed: usize, field: &'static str) -> Result<(), CodecError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(CodecError::UnexpectedEof {
            field,
            needed,
            remaining,
        });
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::StringTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_string(buf: &mut impl Buf, field: &'static str) -> Result<String, CodecError> {
    ensure(&*buf, 2, field)?;
    let len = usize::from(buf.get_u16());
    ensure(&*buf, len, field)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn put_count(buf: &mut BytesMut, field: &'static str, count: usize) -> Result<(), CodecError> {
    let count = i32::try_from(count).map_err(|_| CodecError::CountTooLarge { field, count })?;
    buf.put_i32(count);
    Ok(())
}

fn get_count(buf: &mut impl Buf, field: &'static str) -> Result<usize, CodecError> {
    ensure(&*buf, 4, field)?;
    let count = buf.get_i32();
    usize::try_from(count).map_err(|_| CodecError::NegativeCount { field, count })
}
