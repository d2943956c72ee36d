//! 显式握手循环。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 诊断需要知道握手在哪一步、因何失败；把循环握在自己手里，每一次读、写与引擎调用都是可观测、
//!   可限时的独立步骤，而不是一个黑盒 `connect().await`。
//! - [`HandshakeEngine`] 只暴露循环所需的最小接口（状态、委托任务、加密、解密），
//!   生产实现为 `rustls::ClientConnection`，测试可以注入脚本化引擎。
//!
//! ## 逻辑（How）
//! 维护四个缓冲 `out_plain`/`out_cipher`/`in_cipher`/`in_plain`，在状态不为 `Finished` 时循环：
//! - `NeedTask`：执行挂起的委托任务；
//! - `NeedWrap`：加密到 `out_cipher`，完整写出到套接字后清空；
//! - `NeedUnwrap`：限时读取到 `in_cipher`，解密到 `in_plain`，已消费部分从缓冲前部移除。
//!
//! ## 契约（What）
//! - 解密阶段读到流结束返回 `UnexpectedEof`；任何 I/O 错误立即终止循环；
//! - 引擎报告协议错误时，先尽力把引擎排队的告警写给对端，再返回原错误；
//! - 读写超时以 `io::ErrorKind::TimedOut` 返回。

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use rustls::ClientConnection;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 单次读取预留的缓冲空间。
const READ_CHUNK: usize = 16 * 1024 + 256;

/// 引擎对循环的下一步要求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// 需要执行委托任务（CPU 密集的密码学计算）。
    NeedTask,
    /// 有待发送的密文。
    NeedWrap,
    /// 需要更多来自对端的密文。
    NeedUnwrap,
    /// 握手完成。
    Finished,
}

/// 握手循环所需的最小引擎接口。
pub trait HandshakeEngine {
    /// 当前状态。
    fn status(&self) -> HandshakeStatus;

    /// 执行一个挂起的委托任务。
    fn run_delegated_task(&mut self) -> io::Result<()>;

    /// 把 `out_plain` 交给引擎，并把待发送密文追加到 `out_cipher`。
    fn wrap(&mut self, out_plain: &mut Vec<u8>, out_cipher: &mut Vec<u8>) -> io::Result<()>;

    /// 消费 `in_cipher` 中的密文（已消费部分从前部移除），解出的明文追加到 `in_plain`。
    fn unwrap(&mut self, in_cipher: &mut Vec<u8>, in_plain: &mut Vec<u8>) -> io::Result<()>;
}

impl HandshakeEngine for ClientConnection {
    fn status(&self) -> HandshakeStatus {
        if self.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::Finished
        }
    }

    fn run_delegated_task(&mut self) -> io::Result<()> {
        // rustls 在调用线程内同步完成全部密码学计算，从不报告 NeedTask。
        Ok(())
    }

    fn wrap(&mut self, out_plain: &mut Vec<u8>, out_cipher: &mut Vec<u8>) -> io::Result<()> {
        if !out_plain.is_empty() {
            self.writer().write_all(out_plain)?;
            out_plain.clear();
        }
        while self.wants_write() {
            if self.write_tls(out_cipher)? == 0 {
                break;
            }
        }
        Ok(())
    }

    fn unwrap(&mut self, in_cipher: &mut Vec<u8>, in_plain: &mut Vec<u8>) -> io::Result<()> {
        while !in_cipher.is_empty() {
            let mut pending = &in_cipher[..];
            let consumed = self.read_tls(&mut pending)?;
            in_cipher.drain(..consumed);
            self.process_new_packets()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            if consumed == 0 {
                break;
            }
        }

        let mut chunk = [0u8; 4096];
        loop {
            match self.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => in_plain.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// 握手循环持有的四个缓冲。
#[derive(Debug, Default)]
pub(crate) struct HandshakeBuffers {
    pub out_plain: Vec<u8>,
    pub out_cipher: Vec<u8>,
    pub in_cipher: Vec<u8>,
    pub in_plain: Vec<u8>,
}

/// 驱动引擎直到握手完成。
///
/// `io_timeout` 约束每一次套接字读或写，而不是整个握手。
pub async fn drive_handshake<E, S>(
    engine: &mut E,
    stream: &mut S,
    io_timeout: Duration,
) -> io::Result<()>
where
    E: HandshakeEngine + ?Sized,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffers = HandshakeBuffers::default();
    drive_with_buffers(engine, stream, io_timeout, &mut buffers).await
}

pub(crate) async fn drive_with_buffers<E, S>(
    engine: &mut E,
    stream: &mut S,
    io_timeout: Duration,
    buffers: &mut HandshakeBuffers,
) -> io::Result<()>
where
    E: HandshakeEngine + ?Sized,
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match engine.status() {
            HandshakeStatus::Finished => return Ok(()),
            HandshakeStatus::NeedTask => engine.run_delegated_task()?,
            HandshakeStatus::NeedWrap => {
                engine.wrap(&mut buffers.out_plain, &mut buffers.out_cipher)?;
                if buffers.out_cipher.is_empty() {
                    return Err(io::Error::other("engine requested wrap but produced no data"));
                }
                flush_cipher(stream, &mut buffers.out_cipher, io_timeout).await?;
            }
            HandshakeStatus::NeedUnwrap => {
                buffers.in_cipher.reserve(READ_CHUNK);
                let read = with_timeout(io_timeout, stream.read_buf(&mut buffers.in_cipher)).await?;
                if read == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection during the handshake",
                    ));
                }
                tracing::trace!(bytes = read, "handshake bytes received");
                if let Err(err) = engine.unwrap(&mut buffers.in_cipher, &mut buffers.in_plain) {
                    flush_alert(engine, stream, io_timeout, buffers).await;
                    return Err(err);
                }
            }
        }
    }
}

/// 尽力写出引擎排队的告警；写出失败不掩盖原错误。
async fn flush_alert<E, S>(
    engine: &mut E,
    stream: &mut S,
    io_timeout: Duration,
    buffers: &mut HandshakeBuffers,
) where
    E: HandshakeEngine + ?Sized,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if engine.status() != HandshakeStatus::NeedWrap {
        return;
    }
    if engine
        .wrap(&mut buffers.out_plain, &mut buffers.out_cipher)
        .is_err()
    {
        return;
    }
    if let Err(err) = flush_cipher(stream, &mut buffers.out_cipher, io_timeout).await {
        tracing::debug!(error = %err, "failed to deliver alert to peer");
    }
}

pub(crate) async fn flush_cipher<S>(
    stream: &mut S,
    out_cipher: &mut Vec<u8>,
    io_timeout: Duration,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if out_cipher.is_empty() {
        return Ok(());
    }
    with_timeout(io_timeout, stream.write_all(out_cipher)).await?;
    with_timeout(io_timeout, stream.flush()).await?;
    tracing::trace!(bytes = out_cipher.len(), "handshake bytes sent");
    out_cipher.clear();
    Ok(())
}

async fn with_timeout<T>(
    limit: Duration,
    future: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no progress within {} ms", limit.as_millis()),
        )),
    }
}
