//! 解码错误类型定义。
//!
//! # 教案定位（Why）
//! - 取证回放需要向运维人员说明“哪一个字段、哪一个取值”让解码失败，而不是笼统的“数据损坏”。
//! - 与解析逻辑解耦，避免各子解析器各自拼装错误文案。
//!
//! # 使用契约（What）
//! - 所有变体都表示“当前输入无法解码”，调用方不得使用任何部分结果；
//! - 变体均实现 `Clone`/`PartialEq`，便于测试直接断言。

use thiserror::Error;

use crate::codes::HandshakeType;

/// 解码过程中可能出现的错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// 记录头不合法：内容类型不在 {20,21,22,23} 或长度不在 `[1, 16384]`。
    #[error("malformed record: {reason} ({value})")]
    MalformedRecord {
        /// 违反的约束。
        reason: &'static str,
        /// 实际读到的值。
        value: usize,
    },
    /// 握手消息不合法：未知类型、消息体长度与解析结果不符等。
    #[error("malformed handshake: {reason} ({value})")]
    MalformedHandshake {
        /// 违反的约束。
        reason: &'static str,
        /// 实际读到的值。
        value: usize,
    },
    /// 封闭枚举中不存在的取值。
    #[error("invalid {field} value 0x{value:04x}")]
    InvalidValue {
        /// 字段名称。
        field: &'static str,
        /// 实际读到的编码。
        value: u32,
    },
    /// 剩余字节不足以读取某个字段。
    #[error("truncated {field}: need {needed} bytes, {available} available")]
    Truncated {
        /// 正在读取的字段。
        field: &'static str,
        /// 需要的字节数。
        needed: usize,
        /// 实际剩余字节数。
        available: usize,
    },
    /// 已知但未实现解码的握手消息。
    #[error("unsupported handshake message {0}")]
    Unsupported(HandshakeType),
    /// Certificate 消息中的某张证书无法解析。
    #[error("certificate #{index} is not valid DER: {reason}")]
    InvalidCertificate {
        /// 证书在列表中的位置（从 0 开始）。
        index: usize,
        /// 解析器给出的原因。
        reason: String,
    },
}
