//! 握手观测器：镜像原始字节，失败时回放解码。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手失败时 `rustls` 只给出一个错误值，看不到对端到底发来了什么（HTTP 响应？致命告警？哪条证书链？）。
//!   观测器在套接字与握手循环之间记录每一次读写，失败后交给 `spark-tls-wire` 逐条还原。
//! - 观测器不改变任何协议行为：字节原样透传，只在旁路记账。
//!
//! ## 逻辑（How）
//! - [`ObservedStream`] 实现 tokio 的 `AsyncRead`/`AsyncWrite`，每次成功读写向 [`Journal`] 追加
//!   `Input(len)`/`Output(len)`，并把字节复制进对应方向的有界镜像缓冲；I/O 错误记为 `Exception`；
//! - [`Journal::replay`] 按事务顺序遍历日志，分别累加两个方向的偏移，只解码“本事务记录的那一段字节”，
//!   不完整的记录尾部留在同方向的拼接器中等待下一段。
//!
//! ## 契约（What）
//! - 镜像容量耗尽属于实现缺陷：不截断、不静默丢弃，而是让当前读写以包装了 [`MirrorOverflow`]
//!   的 I/O 错误失败，并以 `error` 级别记录；
//! - 回放是尽力而为：解码失败记录为 [`ForensicEvent::DecodeError`] 并跳过；
//! - 一方向出现 ChangeCipherSpec 之后，该方向的后续握手与告警记录已加密，只记录长度。

use std::{
    fmt, io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use spark_tls_wire::{
    Alert, CertificateSummary, ContentType, HandshakeMessage, HandshakeStream, HandshakeType,
    ProtocolVersion, RecordStream, WireError, decode_alert, extension_name,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// 字节流方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 对端 → 本端。
    Inbound,
    /// 本端 → 对端。
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        })
    }
}

/// 镜像缓冲容量耗尽。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{direction} mirror overflow: capacity {capacity} bytes, {required} bytes required")]
pub struct MirrorOverflow {
    /// 溢出的方向。
    pub direction: Direction,
    /// 容量。
    pub capacity: usize,
    /// 写入后所需的总字节数。
    pub required: usize,
}

/// 事务日志中的一项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// 读入若干字节。
    Input(usize),
    /// 写出若干字节。
    Output(usize),
    /// 一次 I/O 错误。
    Exception(String),
}

/// 一次尝试的事务日志与镜像缓冲。
#[derive(Debug)]
pub struct Journal {
    log: Vec<Transaction>,
    inbound: BytesMut,
    outbound: BytesMut,
    capacity: usize,
}

impl Journal {
    /// 创建日志，`capacity` 为每个方向的镜像容量。
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Vec::new(),
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            capacity,
        }
    }

    /// 事务日志。
    pub fn transactions(&self) -> &[Transaction] {
        &self.log
    }

    /// 某方向已镜像的字节。
    pub fn mirrored(&self, direction: Direction) -> &[u8] {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    pub(crate) fn record(
        &mut self,
        direction: Direction,
        bytes: &[u8],
    ) -> Result<(), MirrorOverflow> {
        let capacity = self.capacity;
        let mirror = match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        };
        let required = mirror.len() + bytes.len();
        if required > capacity {
            return Err(MirrorOverflow {
                direction,
                capacity,
                required,
            });
        }
        mirror.extend_from_slice(bytes);
        self.log.push(match direction {
            Direction::Inbound => Transaction::Input(bytes.len()),
            Direction::Outbound => Transaction::Output(bytes.len()),
        });
        Ok(())
    }

    fn record_exception(&mut self, err: &io::Error) {
        self.log.push(Transaction::Exception(err.to_string()));
    }

    /// 回放全部事务。
    pub fn replay(&self) -> ForensicReport {
        let inbound = Bytes::copy_from_slice(&self.inbound);
        let outbound = Bytes::copy_from_slice(&self.outbound);
        let mut decoders = [
            DirectionDecoder::new(Direction::Inbound),
            DirectionDecoder::new(Direction::Outbound),
        ];
        let (mut in_offset, mut out_offset) = (0usize, 0usize);
        let mut entries = Vec::new();

        for (index, transaction) in self.log.iter().enumerate() {
            match transaction {
                Transaction::Input(len) => {
                    let end = in_offset + len;
                    decoders[0].feed(index, inbound.slice(in_offset..end), &mut entries);
                    in_offset = end;
                }
                Transaction::Output(len) => {
                    let end = out_offset + len;
                    decoders[1].feed(index, outbound.slice(out_offset..end), &mut entries);
                    out_offset = end;
                }
                Transaction::Exception(message) => entries.push(ForensicEntry {
                    transaction: index,
                    direction: None,
                    event: ForensicEvent::Exception(message.clone()),
                }),
            }
        }

        for decoder in &decoders {
            decoder.finish(self.log.len(), &mut entries);
        }
        ForensicReport { entries }
    }
}

/// 回放出的单个事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForensicEvent {
    /// 一条完整记录。
    Record {
        /// 内容类型。
        content_type: ContentType,
        /// 记录层版本。
        version: ProtocolVersion,
        /// 载荷长度。
        length: usize,
    },
    /// 明文告警。
    Alert(Alert),
    /// 握手消息摘要。
    Handshake {
        /// 消息类型。
        handshake_type: HandshakeType,
        /// 关键字段摘要。
        summary: String,
    },
    /// Certificate 消息中的一张证书。
    Certificate {
        /// 链中位置。
        index: usize,
        /// 证书摘要。
        summary: CertificateSummary,
    },
    /// 已加密、无法解码的记录载荷。
    Encrypted {
        /// 记录内容类型。
        content_type: ContentType,
    },
    /// 解码失败，已跳过。
    DecodeError(WireError),
    /// 回放结束时未凑成完整单元的字节。
    Incomplete {
        /// 剩余字节数。
        bytes: usize,
    },
    /// I/O 错误。
    Exception(String),
}

/// 回放报告中的一行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForensicEntry {
    /// 所属事务序号。
    pub transaction: usize,
    /// 方向；I/O 错误不区分方向。
    pub direction: Option<Direction>,
    /// 事件。
    pub event: ForensicEvent,
}

impl fmt::Display for ForensicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Some(Direction::Inbound) => "<-",
            Some(Direction::Outbound) => "->",
            None => "!!",
        };
        write!(f, "#{} {arrow} ", self.transaction)?;
        match &self.event {
            ForensicEvent::Record {
                content_type,
                version,
                length,
            } => write!(f, "record {content_type} {version} length={length}"),
            ForensicEvent::Alert(alert) => write!(f, "  alert {alert}"),
            ForensicEvent::Handshake {
                handshake_type,
                summary,
            } => {
                write!(f, "  {handshake_type}")?;
                if !summary.is_empty() {
                    write!(f, " {summary}")?;
                }
                Ok(())
            }
            ForensicEvent::Certificate { index, summary } => {
                write!(f, "    certificate[{index}] {summary}")
            }
            ForensicEvent::Encrypted { content_type } => {
                write!(f, "  encrypted {content_type} payload")
            }
            ForensicEvent::DecodeError(err) => write!(f, "  undecodable: {err}"),
            ForensicEvent::Incomplete { bytes } => {
                write!(f, "incomplete trailing data ({bytes} bytes)")
            }
            ForensicEvent::Exception(message) => write!(f, "i/o error: {message}"),
        }
    }
}

/// 回放结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForensicReport {
    entries: Vec<ForensicEntry>,
}

impl ForensicReport {
    /// 全部条目，按事务顺序排列。
    pub fn entries(&self) -> &[ForensicEntry] {
        &self.entries
    }

    /// 回放出的全部告警。
    pub fn alerts(&self) -> impl Iterator<Item = (Direction, Alert)> + '_ {
        self.entries.iter().filter_map(|entry| match (&entry.event, entry.direction) {
            (ForensicEvent::Alert(alert), Some(direction)) => Some((direction, *alert)),
            _ => None,
        })
    }

    /// 是否没有任何条目。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ForensicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

struct DirectionDecoder {
    direction: Direction,
    records: RecordStream,
    handshakes: HandshakeStream,
    encrypted: bool,
}

impl DirectionDecoder {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            records: RecordStream::new(),
            handshakes: HandshakeStream::new(),
            encrypted: false,
        }
    }

    fn emit(&self, transaction: usize, event: ForensicEvent, out: &mut Vec<ForensicEntry>) {
        out.push(ForensicEntry {
            transaction,
            direction: Some(self.direction),
            event,
        });
    }

    fn feed(&mut self, transaction: usize, chunk: Bytes, out: &mut Vec<ForensicEntry>) {
        self.records.push(chunk);
        while let Some(next) = self.records.next() {
            let record = match next {
                Ok(record) => record,
                Err(err) => {
                    tracing::debug!(
                        direction = %self.direction,
                        error = %err,
                        "skipping undecodable record"
                    );
                    self.emit(transaction, ForensicEvent::DecodeError(err), out);
                    continue;
                }
            };
            self.emit(
                transaction,
                ForensicEvent::Record {
                    content_type: record.content_type(),
                    version: record.version(),
                    length: record.len(),
                },
                out,
            );
            self.decode_payload(transaction, record.content_type(), record.payload().clone(), out);
        }
    }

    fn decode_payload(
        &mut self,
        transaction: usize,
        content_type: ContentType,
        mut payload: Bytes,
        out: &mut Vec<ForensicEntry>,
    ) {
        match content_type {
            ContentType::ChangeCipherSpec => self.encrypted = true,
            ContentType::ApplicationData => {
                self.emit(transaction, ForensicEvent::Encrypted { content_type }, out);
            }
            _ if self.encrypted => {
                self.emit(transaction, ForensicEvent::Encrypted { content_type }, out);
            }
            ContentType::Alert => match decode_alert(&mut payload) {
                Ok(alert) => self.emit(transaction, ForensicEvent::Alert(alert), out),
                Err(err) => self.emit(transaction, ForensicEvent::DecodeError(err), out),
            },
            ContentType::Handshake => {
                self.handshakes.push(payload);
                while let Some(next) = self.handshakes.next() {
                    match next {
                        Ok(message) => self.emit_handshake(transaction, message, out),
                        Err(err) => {
                            tracing::debug!(
                                direction = %self.direction,
                                error = %err,
                                "skipping undecodable handshake message"
                            );
                            self.emit(transaction, ForensicEvent::DecodeError(err), out);
                        }
                    }
                }
            }
        }
    }

    fn emit_handshake(
        &self,
        transaction: usize,
        message: HandshakeMessage,
        out: &mut Vec<ForensicEntry>,
    ) {
        let handshake_type = message.handshake_type();
        let summary = match &message {
            HandshakeMessage::ClientHello(hello) => {
                let suites: Vec<&str> =
                    hello.cipher_suites.iter().map(|suite| suite.name()).collect();
                let extensions: Vec<String> = hello
                    .extensions
                    .iter()
                    .map(|ext| {
                        extension_name(ext.extension_type)
                            .map(str::to_owned)
                            .unwrap_or_else(|| format!("0x{:04x}", ext.extension_type))
                    })
                    .collect();
                format!(
                    "version={} suites=[{}] extensions=[{}]",
                    hello.version,
                    suites.join(", "),
                    extensions.join(", ")
                )
            }
            HandshakeMessage::ServerHello(hello) => format!(
                "version={} suite={} extensions={}",
                hello.version,
                hello.cipher_suite,
                hello.extensions.len()
            ),
            HandshakeMessage::Certificate(message) => {
                format!("chain length={}", message.certificates.len())
            }
            HandshakeMessage::CertificateRequest(request) => {
                format!("authorities={}", request.authorities.len())
            }
            HandshakeMessage::ServerKeyExchange(kx) | HandshakeMessage::ClientKeyExchange(kx) => {
                format!("length={}", kx.body.len())
            }
            HandshakeMessage::HelloRequest | HandshakeMessage::ServerHelloDone => String::new(),
        };
        self.emit(
            transaction,
            ForensicEvent::Handshake {
                handshake_type,
                summary,
            },
            out,
        );

        if let HandshakeMessage::Certificate(message) = message {
            for (index, entry) in message.certificates.into_iter().enumerate() {
                self.emit(
                    transaction,
                    ForensicEvent::Certificate {
                        index,
                        summary: entry.summary,
                    },
                    out,
                );
            }
        }
    }

    fn finish(&self, transaction: usize, out: &mut Vec<ForensicEntry>) {
        let bytes = self.records.pending_len() + self.handshakes.pending_len();
        if bytes > 0 {
            self.emit(transaction, ForensicEvent::Incomplete { bytes }, out);
        }
    }
}

/// 记录读写并镜像字节的流包装。
#[derive(Debug)]
pub struct ObservedStream<S> {
    inner: S,
    journal: Journal,
}

impl<S> ObservedStream<S> {
    /// 包装底层流，`capacity` 为每个方向的镜像容量。
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            journal: Journal::new(capacity),
        }
    }

    /// 当前日志。
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// 拆出底层流与日志。
    pub fn into_parts(self) -> (S, Journal) {
        (self.inner, self.journal)
    }
}

fn overflow_error(overflow: MirrorOverflow) -> io::Error {
    tracing::error!(%overflow, "handshake mirror exhausted; this is a bug in the observer sizing");
    io::Error::other(overflow)
}

impl<S: AsyncRead + Unpin> AsyncRead for ObservedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if !fresh.is_empty() {
                    if let Err(overflow) = this.journal.record(Direction::Inbound, fresh) {
                        return Poll::Ready(Err(overflow_error(overflow)));
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.journal.record_exception(&err);
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ObservedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                if let Err(overflow) = this.journal.record(Direction::Outbound, &buf[..written]) {
                    return Poll::Ready(Err(overflow_error(overflow)));
                }
                Poll::Ready(Ok(written))
            }
            Poll::Ready(Err(err)) => {
                this.journal.record_exception(&err);
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Err(err)) = &result {
            this.journal.record_exception(err);
        }
        result
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let Poll::Ready(Err(err)) = &result {
            this.journal.record_exception(err);
        }
        result
    }
}
