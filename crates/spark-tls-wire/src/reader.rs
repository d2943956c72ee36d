//! 基于 `Bytes` 的大端读取辅助函数。
//!
//! 每个函数在字节不足时返回 [`WireError::Truncated`]，从不调用会 panic 的 `Buf::get_*`。

use bytes::{Buf, Bytes};

use crate::error::WireError;

fn ensure(buf: &Bytes, needed: usize, field: &'static str) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            field,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

pub(crate) fn read_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, WireError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u16(buf: &mut Bytes, field: &'static str) -> Result<u16, WireError> {
    ensure(buf, 2, field)?;
    Ok(buf.get_u16())
}

pub(crate) fn read_u24(buf: &mut Bytes, field: &'static str) -> Result<usize, WireError> {
    ensure(buf, 3, field)?;
    let high = usize::from(buf.get_u8());
    let low = usize::from(buf.get_u16());
    Ok((high << 16) | low)
}

pub(crate) fn read_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, WireError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32())
}

/// 切出 `len` 字节的零拷贝视图。
pub(crate) fn read_slice(
    buf: &mut Bytes,
    len: usize,
    field: &'static str,
) -> Result<Bytes, WireError> {
    ensure(buf, len, field)?;
    Ok(buf.split_to(len))
}

pub(crate) fn read_u8_prefixed(buf: &mut Bytes, field: &'static str) -> Result<Bytes, WireError> {
    let len = usize::from(read_u8(buf, field)?);
    read_slice(buf, len, field)
}

pub(crate) fn read_u16_prefixed(buf: &mut Bytes, field: &'static str) -> Result<Bytes, WireError> {
    let len = usize::from(read_u16(buf, field)?);
    read_slice(buf, len, field)
}

pub(crate) fn read_u24_prefixed(buf: &mut Bytes, field: &'static str) -> Result<Bytes, WireError> {
    let len = read_u24(buf, field)?;
    read_slice(buf, len, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reads_report_truncation() {
        let mut buf = Bytes::from_static(&[0x01, 0x02]);
        assert_eq!(
            read_u24(&mut buf, "length"),
            Err(WireError::Truncated {
                field: "length",
                needed: 3,
                available: 2
            })
        );
        assert_eq!(read_u16(&mut buf, "length"), Ok(0x0102));
    }

    #[test]
    fn prefixed_slices_are_views() {
        let mut buf = Bytes::from_static(&[0x00, 0x00, 0x02, 0xaa, 0xbb, 0xcc]);
        let body = read_u24_prefixed(&mut buf, "body").unwrap();
        assert_eq!(&body[..], &[0xaa, 0xbb]);
        assert_eq!(&buf[..], &[0xcc]);
    }
}
