//! 记录层（RFC 5246 §6.2.1）解码。

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codes::{ContentType, ProtocolVersion},
    error::WireError,
    reader::{read_slice, read_u8, read_u16},
};

/// 记录头长度：1 字节类型 + 2 字节版本 + 2 字节长度。
pub const RECORD_HEADER_LEN: usize = 5;

/// 明文记录载荷上限 2^14。
pub const MAX_RECORD_PAYLOAD: usize = 16_384;

/// 单条 TLS 记录。
///
/// # 契约（What）
/// - `payload` 长度恒在 `[1, MAX_RECORD_PAYLOAD]`，由 [`Record::new`] 与 [`decode_record`] 共同保证；
/// - `payload` 是原始缓冲的零拷贝视图，不会在解码时复制。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    content_type: ContentType,
    version: ProtocolVersion,
    payload: Bytes,
}

impl Record {
    /// 构造记录并校验载荷长度。
    pub fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        payload: Bytes,
    ) -> Result<Self, WireError> {
        check_length(payload.len())?;
        Ok(Self {
            content_type,
            version,
            payload,
        })
    }

    /// 内容类型。
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// 记录层版本。
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// 载荷视图。
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 载荷长度。
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// 记录永远非空，保留该方法以满足 `len`/`is_empty` 成对约定。
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// 将记录按线上格式写入 `out`。
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(RECORD_HEADER_LEN + self.payload.len());
        out.put_u8(self.content_type.code());
        out.put_u16(self.version.code());
        // 长度已在构造时限制在 16384 以内。
        out.put_u16(self.payload.len() as u16);
        out.put_slice(&self.payload);
    }
}

fn check_length(len: usize) -> Result<(), WireError> {
    if len == 0 || len > MAX_RECORD_PAYLOAD {
        return Err(WireError::MalformedRecord {
            reason: "length outside [1, 16384]",
            value: len,
        });
    }
    Ok(())
}

/// 从 `buf` 头部解码一条记录。
///
/// # 契约（What）
/// - 内容类型不在 {20,21,22,23}、长度为 0 或超过 16384 时返回 [`WireError::MalformedRecord`]；
/// - 版本号不是已知协议版本时返回 [`WireError::InvalidValue`]；
/// - 载荷不足时返回 [`WireError::Truncated`]；
/// - 仅在成功时推进 `buf`，失败时调用方缓冲保持原样。
pub fn decode_record(buf: &mut Bytes) -> Result<Record, WireError> {
    let mut cursor = buf.clone();

    let raw_type = read_u8(&mut cursor, "record content type")?;
    let content_type =
        ContentType::from_code(raw_type).map_err(|_| WireError::MalformedRecord {
            reason: "unknown content type",
            value: usize::from(raw_type),
        })?;
    let version = ProtocolVersion::from_code(read_u16(&mut cursor, "record version")?)?;
    let length = usize::from(read_u16(&mut cursor, "record length")?);
    check_length(length)?;
    let payload = read_slice(&mut cursor, length, "record payload")?;

    *buf = cursor;
    Ok(Record {
        content_type,
        version,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_alert_record_and_advances() {
        let mut buf = Bytes::from_static(&[21, 3, 3, 0, 2, 2, 40, 0xff]);
        let record = decode_record(&mut buf).unwrap();
        assert_eq!(record.content_type(), ContentType::Alert);
        assert_eq!(record.version(), ProtocolVersion::Tls1_2);
        assert_eq!(&record.payload()[..], &[2, 40]);
        assert_eq!(&buf[..], &[0xff]);
    }

    #[test]
    fn rejects_unknown_content_type_without_advancing() {
        let original = Bytes::from_static(&[0x48, 0x54, 0x54, 0x50, 0x2f]);
        let mut buf = original.clone();
        let err = decode_record(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::MalformedRecord { value: 0x48, .. }));
        assert_eq!(buf, original);
    }

    #[test]
    fn rejects_zero_and_oversized_lengths() {
        let mut empty = Bytes::from_static(&[22, 3, 1, 0, 0]);
        assert!(matches!(
            decode_record(&mut empty),
            Err(WireError::MalformedRecord { value: 0, .. })
        ));

        let mut oversized = Bytes::from_static(&[23, 3, 3, 0x40, 0x01]);
        assert!(matches!(
            decode_record(&mut oversized),
            Err(WireError::MalformedRecord { value: 16_385, .. })
        ));
    }

    #[test]
    fn short_payload_is_truncation() {
        let mut buf = Bytes::from_static(&[22, 3, 3, 0, 4, 1, 2]);
        assert_eq!(
            decode_record(&mut buf),
            Err(WireError::Truncated {
                field: "record payload",
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn constructor_enforces_length() {
        assert!(
            Record::new(ContentType::Handshake, ProtocolVersion::Tls1_2, Bytes::new()).is_err()
        );
    }
}
