//! 跨分片拼接：把按事务到达的字节还原为完整记录与握手消息。
//!
//! # 教案定位（Why）
//! - 套接字读写的分块边界与记录边界无关：一次读取可能只含半条记录，也可能含多条记录；
//!   一条握手消息同样可能跨越多条 Handshake 记录。
//! - 回放按事务逐块喂入字节，本模块负责在同一方向内把不完整的尾部留待下一块补齐。
//!
//! # 契约（What）
//! - 两个流都实现 [`Iterator`]：返回 `None` 表示“当前缓冲不足以构成下一条完整单元”，
//!   继续 `push` 后可再次迭代；
//! - [`RecordStream`] 遇到非截断错误时丢弃全部待处理字节，因为记录边界已无法恢复；
//! - [`HandshakeStream`] 的帧边界由消息头确定，单条消息解码失败不影响后续消息。

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    HANDSHAKE_HEADER_LEN,
    error::WireError,
    handshake::{HandshakeMessage, decode_handshake},
    record::{Record, decode_record},
};

fn append(pending: &mut Bytes, chunk: Bytes) {
    if pending.is_empty() {
        *pending = chunk;
        return;
    }
    let mut joined = BytesMut::with_capacity(pending.len() + chunk.len());
    joined.put_slice(pending);
    joined.put_slice(&chunk);
    *pending = joined.freeze();
}

/// 单方向的记录拼接器。
#[derive(Debug, Default)]
pub struct RecordStream {
    pending: Bytes,
}

impl RecordStream {
    /// 创建空的拼接器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块新到达的字节。
    pub fn push(&mut self, chunk: Bytes) {
        append(&mut self.pending, chunk);
    }

    /// 尚未构成完整记录的字节数。
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }
        match decode_record(&mut self.pending) {
            Ok(record) => Some(Ok(record)),
            Err(WireError::Truncated { .. }) => None,
            Err(err) => {
                self.pending.clear();
                Some(Err(err))
            }
        }
    }
}

/// 单方向的握手消息拼接器，输入为 Handshake 记录的载荷。
#[derive(Debug, Default)]
pub struct HandshakeStream {
    pending: Bytes,
}

impl HandshakeStream {
    /// 创建空的拼接器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条 Handshake 记录的载荷。
    pub fn push(&mut self, payload: Bytes) {
        append(&mut self.pending, payload);
    }

    /// 尚未构成完整消息的字节数。
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for HandshakeStream {
    type Item = Result<HandshakeMessage, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.len() < HANDSHAKE_HEADER_LEN {
            return None;
        }
        let body_len = (usize::from(self.pending[1]) << 16)
            | (usize::from(self.pending[2]) << 8)
            | usize::from(self.pending[3]);
        let frame_len = HANDSHAKE_HEADER_LEN + body_len;
        if self.pending.len() < frame_len {
            return None;
        }
        let mut frame = self.pending.split_to(frame_len);
        Some(decode_handshake(&mut frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{ContentType, HandshakeType};

    #[test]
    fn record_split_across_chunks_is_reassembled() {
        let mut stream = RecordStream::new();
        stream.push(Bytes::from_static(&[22, 3, 3, 0]));
        assert!(stream.next().is_none());
        stream.push(Bytes::from_static(&[4, 14, 0, 0]));
        assert!(stream.next().is_none());
        assert_eq!(stream.pending_len(), 8);
        stream.push(Bytes::from_static(&[0, 21, 3, 3, 0, 2, 2, 40]));

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.content_type(), ContentType::Handshake);
        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.content_type(), ContentType::Alert);
        assert!(stream.next().is_none());
        assert_eq!(stream.pending_len(), 0);
    }

    #[test]
    fn non_tls_bytes_drop_the_backlog() {
        let mut stream = RecordStream::new();
        stream.push(Bytes::from_static(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(
            stream.next(),
            Some(Err(WireError::MalformedRecord { .. }))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn handshake_messages_span_records() {
        let mut stream = HandshakeStream::new();
        stream.push(Bytes::from_static(&[14, 0]));
        assert!(stream.next().is_none());
        stream.push(Bytes::from_static(&[0, 0, 20, 0, 0, 1, 0xaa]));

        let done = stream.next().unwrap().unwrap();
        assert_eq!(done.handshake_type(), HandshakeType::ServerHelloDone);
        assert_eq!(
            stream.next(),
            Some(Err(WireError::Unsupported(HandshakeType::Finished)))
        );
        assert!(stream.next().is_none());
    }
}
