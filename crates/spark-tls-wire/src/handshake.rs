//! 握手子消息（RFC 5246 §7.4）解码。
//!
//! # 教案定位（Why）
//! - 回放取证需要把握手记录还原为结构化消息，才能说明“握手停在了哪一步、对端给了什么”。
//! - 以带标签的枚举 [`HandshakeMessage`] 表达全部已实现的消息种类，所有消费方穷尽匹配；
//!   未实现的 CertificateVerify/Finished 明确返回 [`WireError::Unsupported`]，不会被静默丢弃。
//!
//! # 契约（What）
//! - Hello 消息按“版本 → 随机数 → 会话 ID → 套件 → 压缩 → 扩展”顺序读取；
//!   **仅当仍有剩余字节时才读取扩展块**，旧客户端省略该块时视为“无扩展”而非截断；
//! - 消息体长度必须与子解析器的消费量完全一致，多余字节返回 [`WireError::MalformedHandshake`]；
//! - Certificate 消息中任一证书解析失败即整体失败，不返回部分结果。
//!
//! # 风险提示（Trade-offs）
//! - 无状态解码器不知道协商出的密钥交换算法，ServerKeyExchange/ClientKeyExchange 只保留原始消息体；
//! - CertificateRequest 的布局随协议版本变化：先按 TLS 1.2 布局解析，不吻合时退回 1.2 之前的布局。

use bytes::Bytes;

use crate::{
    certificate::{CertificateSummary, summarize_certificate},
    codes::{CipherSuite, HandshakeType, ProtocolVersion},
    error::WireError,
    reader::{
        read_slice, read_u8, read_u8_prefixed, read_u16, read_u16_prefixed, read_u24,
        read_u24_prefixed, read_u32,
    },
};

/// 会话 ID 的协议上限。
const MAX_SESSION_ID_LEN: usize = 32;

/// 已实现解码的握手消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// hello_request，消息体为空。
    HelloRequest,
    /// client_hello
    ClientHello(ClientHello),
    /// server_hello
    ServerHello(ServerHello),
    /// certificate
    Certificate(CertificateMessage),
    /// server_key_exchange
    ServerKeyExchange(KeyExchange),
    /// certificate_request
    CertificateRequest(CertificateRequest),
    /// server_hello_done，消息体为空。
    ServerHelloDone,
    /// client_key_exchange
    ClientKeyExchange(KeyExchange),
}

impl HandshakeMessage {
    /// 消息对应的线上类型。
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::HelloRequest => HandshakeType::HelloRequest,
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
        }
    }
}

/// Hello 消息中的 32 字节随机数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random {
    /// 前 4 字节：发送方时钟（TLS 1.3 起不再有意义）。
    pub gmt_unix_time: u32,
    /// 后 28 字节随机数据。
    pub random_bytes: [u8; 28],
}

/// 单个扩展：类型 + 原始数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// 扩展类型编码。
    pub extension_type: u16,
    /// 扩展数据视图。
    pub data: Bytes,
}

/// client_hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// 客户端支持的最高版本。
    pub version: ProtocolVersion,
    /// 客户端随机数。
    pub random: Random,
    /// 会话 ID（可能为空）。
    pub session_id: Bytes,
    /// 按偏好排序的套件列表。
    pub cipher_suites: Vec<CipherSuite>,
    /// 压缩方法列表。
    pub compression_methods: Vec<u8>,
    /// 扩展列表；旧客户端省略扩展块时为空。
    pub extensions: Vec<Extension>,
}

/// server_hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// 服务端选定的版本（TLS 1.3 中固定为 1.2，真实版本位于 supported_versions 扩展）。
    pub version: ProtocolVersion,
    /// 服务端随机数。
    pub random: Random,
    /// 会话 ID。
    pub session_id: Bytes,
    /// 选定的套件。
    pub cipher_suite: CipherSuite,
    /// 选定的压缩方法。
    pub compression_method: u8,
    /// 扩展列表。
    pub extensions: Vec<Extension>,
}

/// certificate 消息中的一张证书。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// DER 编码视图。
    pub der: Bytes,
    /// 解析出的摘要。
    pub summary: CertificateSummary,
}

/// certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMessage {
    /// 按发送顺序排列的证书链。
    pub certificates: Vec<CertificateEntry>,
}

/// server_key_exchange / client_key_exchange 的原始消息体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchange {
    /// 未解释的消息体视图。
    pub body: Bytes,
}

/// certificate_request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// 可接受的客户端证书类型。
    pub certificate_types: Vec<u8>,
    /// TLS 1.2 的签名算法对；旧布局下为 `None`。
    pub signature_algorithms: Option<Vec<u16>>,
    /// 可接受的 CA 名称（DER 编码 DN）。
    pub authorities: Vec<Bytes>,
}

/// 从 `buf` 头部解码一条握手消息。
///
/// # 契约（What）
/// - 未知类型返回 [`WireError::MalformedHandshake`]；
/// - CertificateVerify、Finished、NewSessionTicket 返回 [`WireError::Unsupported`]；
/// - 仅在成功时推进 `buf`。
pub fn decode_handshake(buf: &mut Bytes) -> Result<HandshakeMessage, WireError> {
    let mut cursor = buf.clone();

    let raw_type = read_u8(&mut cursor, "handshake type")?;
    let msg_type =
        HandshakeType::from_code(raw_type).map_err(|_| WireError::MalformedHandshake {
            reason: "unknown handshake type",
            value: usize::from(raw_type),
        })?;
    let length = read_u24(&mut cursor, "handshake length")?;
    let mut body = read_slice(&mut cursor, length, "handshake body")?;

    let message = match msg_type {
        HandshakeType::HelloRequest => HandshakeMessage::HelloRequest,
        HandshakeType::ClientHello => HandshakeMessage::ClientHello(parse_client_hello(&mut body)?),
        HandshakeType::ServerHello => HandshakeMessage::ServerHello(parse_server_hello(&mut body)?),
        HandshakeType::Certificate => {
            HandshakeMessage::Certificate(parse_certificate_message(&mut body)?)
        }
        HandshakeType::ServerKeyExchange => {
            HandshakeMessage::ServerKeyExchange(take_key_exchange(&mut body))
        }
        HandshakeType::CertificateRequest => {
            HandshakeMessage::CertificateRequest(parse_certificate_request(&mut body)?)
        }
        HandshakeType::ServerHelloDone => HandshakeMessage::ServerHelloDone,
        HandshakeType::ClientKeyExchange => {
            HandshakeMessage::ClientKeyExchange(take_key_exchange(&mut body))
        }
        HandshakeType::NewSessionTicket
        | HandshakeType::CertificateVerify
        | HandshakeType::Finished => return Err(WireError::Unsupported(msg_type)),
    };

    if !body.is_empty() {
        return Err(WireError::MalformedHandshake {
            reason: "trailing bytes after message body",
            value: body.len(),
        });
    }

    *buf = cursor;
    Ok(message)
}

fn parse_random(body: &mut Bytes) -> Result<Random, WireError> {
    let gmt_unix_time = read_u32(body, "random timestamp")?;
    let raw = read_slice(body, 28, "random bytes")?;
    let mut random_bytes = [0u8; 28];
    random_bytes.copy_from_slice(&raw);
    Ok(Random {
        gmt_unix_time,
        random_bytes,
    })
}

fn parse_session_id(body: &mut Bytes) -> Result<Bytes, WireError> {
    let session_id = read_u8_prefixed(body, "session id")?;
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(WireError::MalformedHandshake {
            reason: "session id longer than 32 bytes",
            value: session_id.len(),
        });
    }
    Ok(session_id)
}

/// 扩展块可选：消息体已读尽即视为“无扩展”。
fn parse_extensions(body: &mut Bytes) -> Result<Vec<Extension>, WireError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut block = read_u16_prefixed(body, "extensions")?;
    let mut extensions = Vec::new();
    while !block.is_empty() {
        let extension_type = read_u16(&mut block, "extension type")?;
        let data = read_u16_prefixed(&mut block, "extension data")?;
        extensions.push(Extension {
            extension_type,
            data,
        });
    }
    Ok(extensions)
}

fn parse_client_hello(body: &mut Bytes) -> Result<ClientHello, WireError> {
    let version = ProtocolVersion::from_code(read_u16(body, "client version")?)?;
    let random = parse_random(body)?;
    let session_id = parse_session_id(body)?;

    let mut suites = read_u16_prefixed(body, "cipher suites")?;
    if suites.len() % 2 != 0 {
        return Err(WireError::MalformedHandshake {
            reason: "odd cipher suite list length",
            value: suites.len(),
        });
    }
    let mut cipher_suites = Vec::with_capacity(suites.len() / 2);
    while !suites.is_empty() {
        cipher_suites.push(CipherSuite::from_code(read_u16(&mut suites, "cipher suite")?)?);
    }

    let compression_methods = read_u8_prefixed(body, "compression methods")?.to_vec();
    let extensions = parse_extensions(body)?;

    Ok(ClientHello {
        version,
        random,
        session_id,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

fn parse_server_hello(body: &mut Bytes) -> Result<ServerHello, WireError> {
    let version = ProtocolVersion::from_code(read_u16(body, "server version")?)?;
    let random = parse_random(body)?;
    let session_id = parse_session_id(body)?;
    let cipher_suite = CipherSuite::from_code(read_u16(body, "cipher suite")?)?;
    let compression_method = read_u8(body, "compression method")?;
    let extensions = parse_extensions(body)?;

    Ok(ServerHello {
        version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}

fn parse_certificate_message(body: &mut Bytes) -> Result<CertificateMessage, WireError> {
    let mut list = read_u24_prefixed(body, "certificate list")?;
    let mut certificates = Vec::new();
    while !list.is_empty() {
        let index = certificates.len();
        let der = read_u24_prefixed(&mut list, "certificate")?;
        let summary = summarize_certificate(&der)
            .map_err(|reason| WireError::InvalidCertificate { index, reason })?;
        certificates.push(CertificateEntry { der, summary });
    }
    Ok(CertificateMessage { certificates })
}

fn take_key_exchange(body: &mut Bytes) -> KeyExchange {
    KeyExchange {
        body: body.split_to(body.len()),
    }
}

fn parse_certificate_request(body: &mut Bytes) -> Result<CertificateRequest, WireError> {
    let certificate_types = read_u8_prefixed(body, "certificate types")?.to_vec();

    let mut modern = body.clone();
    if let Ok((signature_algorithms, authorities)) = parse_tls12_request_tail(&mut modern) {
        if modern.is_empty() {
            *body = modern;
            return Ok(CertificateRequest {
                certificate_types,
                signature_algorithms: Some(signature_algorithms),
                authorities,
            });
        }
    }

    let authorities = parse_authorities(body)?;
    Ok(CertificateRequest {
        certificate_types,
        signature_algorithms: None,
        authorities,
    })
}

fn parse_tls12_request_tail(body: &mut Bytes) -> Result<(Vec<u16>, Vec<Bytes>), WireError> {
    let mut algorithms = read_u16_prefixed(body, "signature algorithms")?;
    if algorithms.len() % 2 != 0 {
        return Err(WireError::MalformedHandshake {
            reason: "odd signature algorithm list length",
            value: algorithms.len(),
        });
    }
    let mut pairs = Vec::with_capacity(algorithms.len() / 2);
    while !algorithms.is_empty() {
        pairs.push(read_u16(&mut algorithms, "signature algorithm")?);
    }
    let authorities = parse_authorities(body)?;
    Ok((pairs, authorities))
}

fn parse_authorities(body: &mut Bytes) -> Result<Vec<Bytes>, WireError> {
    let mut list = read_u16_prefixed(body, "certificate authorities")?;
    let mut authorities = Vec::new();
    while !list.is_empty() {
        authorities.push(read_u16_prefixed(&mut list, "distinguished name")?);
    }
    Ok(authorities)
}
