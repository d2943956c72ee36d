//! 告警协议（RFC 5246 §7.2）解码。

use core::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codes::{AlertDescription, AlertLevel},
    error::WireError,
    reader::read_u8,
};

/// 一条告警消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    /// 告警级别。
    pub level: AlertLevel,
    /// 告警描述。
    pub description: AlertDescription,
}

impl Alert {
    /// 致命告警的便捷构造。
    pub const fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// 写出 2 字节告警体（不含记录头）。
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.level.code());
        out.put_u8(self.description.code());
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level, self.description)
    }
}

/// 从 `buf` 头部解码一条告警；级别与描述都必须是已知取值。
pub fn decode_alert(buf: &mut Bytes) -> Result<Alert, WireError> {
    let mut cursor = buf.clone();
    let level = AlertLevel::from_code(read_u8(&mut cursor, "alert level")?)?;
    let description = AlertDescription::from_code(read_u8(&mut cursor, "alert description")?)?;
    *buf = cursor;
    Ok(Alert { level, description })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fatal_handshake_failure() {
        let mut buf = Bytes::from_static(&[2, 40]);
        let alert = decode_alert(&mut buf).unwrap();
        assert_eq!(alert, Alert::fatal(AlertDescription::HandshakeFailure));
        assert_eq!(alert.to_string(), "fatal handshake_failure");
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_level_and_description() {
        assert!(matches!(
            decode_alert(&mut Bytes::from_static(&[3, 40])),
            Err(WireError::InvalidValue { field: "AlertLevel", value: 3 })
        ));
        assert!(matches!(
            decode_alert(&mut Bytes::from_static(&[2, 250])),
            Err(WireError::InvalidValue { field: "AlertDescription", value: 250 })
        ));
    }
}
