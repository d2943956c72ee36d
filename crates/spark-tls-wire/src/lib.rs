#![warn(missing_docs)]

//! # spark-tls-wire
//!
//! ## 教案目的（Why）
//! - **定位**：RFC 5246 §6–7 定义的 TLS 记录层与握手子消息的无副作用解码器，服务于握手失败后的取证回放。
//! - **架构角色**：`spark-tls-probe` 的观测器在握手失败时把镜像下来的原始字节交给本 crate，
//!   逐条还原 Record / HandshakeMessage / Alert 并输出可读诊断。
//! - **设计策略**：输入统一为 `bytes::Bytes`，载荷以零拷贝切片形式返回；任何字段越界或取值非法都返回
//!   精确的 [`WireError`]，绝不 panic。
//!
//! ## 交互契约（What）
//! - [`decode_record`]：5 字节记录头 + 载荷，长度必须落在 `[1, 16384]`；
//! - [`decode_handshake`]：1 字节类型 + 3 字节长度 + 消息体，按 [`HandshakeMessage`] 变体分派；
//! - [`decode_alert`]：1 字节级别 + 1 字节描述；
//! - [`RecordStream`]/[`HandshakeStream`]：跨分片拼接记录与握手消息，供回放按事务喂入字节；
//! - 编码侧仅提供测试与伪造对端所需的最小写入器（[`Record::encode`]、[`Alert::encode`]）。
//!
//! ## 实现策略（How）
//! - 每个解码入口先在 `Bytes` 克隆上读取，成功后才回写调用方缓冲位置，失败时调用方状态保持不变；
//! - 所有整数均为无符号大端；
//! - Certificate 消息内的每张证书都经 `x509-parser` 解析，任一失败即整体失败，不返回部分结果。
//!
//! ## 风险提示（Trade-offs）
//! - ServerKeyExchange/ClientKeyExchange 的布局取决于协商出的密钥交换算法，无状态解码器只保留原始消息体；
//! - TLS 1.3 中 ServerHello 之后的握手消息被加密承载于 ApplicationData 记录，无法被解码，这是协议使然。

mod alert;
mod certificate;
mod codes;
mod error;
mod handshake;
mod reader;
mod record;
mod stream;

pub use crate::{
    alert::{Alert, decode_alert},
    certificate::{CertificateSummary, summarize_certificate},
    codes::{
        AlertDescription, AlertLevel, CipherSuite, ContentType, HandshakeType, ProtocolVersion,
        extension_name,
    },
    error::WireError,
    handshake::{
        CertificateEntry, CertificateMessage, CertificateRequest, ClientHello, Extension,
        HandshakeMessage, KeyExchange, Random, ServerHello, decode_handshake,
    },
    record::{MAX_RECORD_PAYLOAD, RECORD_HEADER_LEN, Record, decode_record},
    stream::{HandshakeStream, RecordStream},
};

/// 握手消息头长度：1 字节类型 + 3 字节长度。
pub const HANDSHAKE_HEADER_LEN: usize = 4;
