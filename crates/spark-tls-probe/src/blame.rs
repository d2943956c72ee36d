//! 根因解析：沿错误的原因链找到最内层、可归类的根因。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 同一个根因往往被层层包装：`ProbeError` → `io::Error` → `rustls::Error`。报告器按根因归组，
//!   因此必须剥掉所有包装层，而不是依据最外层文案。
//!
//! ## 逻辑（How）
//! 1. 从外向内收集整条链；`io::Error::source()` 会跳过其包装的错误，遇到 `io::Error` 时改用 `get_ref()`；
//! 2. 从最内层向外逐层尝试归类，第一个能给出明确类别的节点即为根因；
//! 3. 整条链都无法归类时归入 [`RootCause::Other`]。
//!
//! ## 契约（What）
//! - [`RootCause`] 实现 `Ord`，报告器据此对分组做确定性排序；
//! - 类别只携带错误种类，不携带文本：同一种失败在不同地址上的措辞差异不会拆散分组，
//!   文本保存在 [`Blame::message`]；
//! - 解析是纯函数，不分配除结果文本外的任何资源。

use std::{error::Error, fmt, io};

use rustls::{AlertDescription, CertificateError};

use crate::{
    error::{FailureStage, ProbeError},
    observer::MirrorOverflow,
};

/// 根因类别。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootCause {
    /// 证书路径或链校验失败。
    CertificatePath,
    /// 握手中途遭遇流结束。
    UnexpectedEof,
    /// 对端明确拒绝握手：握手期间收到的任何致命告警，或能力不兼容。
    HandshakeRejected,
    /// 证书与期望主机名不匹配。
    HostnameMismatch,
    /// TCP 连接被拒绝。
    ConnectionRefused,
    /// 连接或读写超时。
    Timeout,
    /// 实现缺陷。
    Bug,
    /// 其他 I/O 错误，按错误种类区分。
    Io(io::ErrorKind),
    /// 其他 TLS 协议错误，按 `rustls::Error` 的变体区分。
    Tls(&'static str),
    /// 无法归类的错误。
    Other,
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootCause::CertificatePath => f.write_str("certificate path validation failed"),
            RootCause::UnexpectedEof => f.write_str("unexpected end of stream during handshake"),
            RootCause::HandshakeRejected => f.write_str("handshake rejected by peer"),
            RootCause::HostnameMismatch => f.write_str("certificate does not match hostname"),
            RootCause::ConnectionRefused => f.write_str("connection refused"),
            RootCause::Timeout => f.write_str("timed out"),
            RootCause::Bug => f.write_str("internal error"),
            RootCause::Io(kind) => write!(f, "I/O error: {kind}"),
            RootCause::Tls(variant) => write!(f, "TLS error: {variant}"),
            RootCause::Other => f.write_str("unclassified error"),
        }
    }
}

/// 根因解析结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blame {
    /// 根因类别。
    pub cause: RootCause,
    /// 给出该类别的错误的文本。
    pub message: String,
}

/// 原因链的下一层；`io::Error` 经 `get_ref()` 穿透。
pub(crate) fn next_cause<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a (dyn Error + 'static)> {
    match err.downcast_ref::<io::Error>() {
        Some(io_err) => io_err
            .get_ref()
            .map(|inner| inner as &(dyn Error + 'static)),
        None => err.source(),
    }
}

/// 返回原因链的最内层错误。
pub fn root_cause_of<'a>(err: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut current = err;
    while let Some(next) = next_cause(current) {
        current = next;
    }
    current
}

/// 解析错误的根因。
pub fn blame(err: &(dyn Error + 'static)) -> Blame {
    let mut chain = vec![err];
    let mut current = err;
    while let Some(next) = next_cause(current) {
        chain.push(next);
        current = next;
    }

    for node in chain.iter().rev() {
        if let Some(cause) = classify(*node) {
            return Blame {
                cause,
                message: node.to_string(),
            };
        }
    }

    Blame {
        cause: RootCause::Other,
        message: current.to_string(),
    }
}

fn classify(err: &(dyn Error + 'static)) -> Option<RootCause> {
    if let Some(tls) = err.downcast_ref::<rustls::Error>() {
        return Some(classify_rustls(tls));
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return Some(classify_io(io_err.kind()));
    }
    if err.is::<MirrorOverflow>() {
        return Some(RootCause::Bug);
    }
    if let Some(probe) = err.downcast_ref::<ProbeError>() {
        return match probe.stage() {
            FailureStage::Hostname => Some(RootCause::HostnameMismatch),
            FailureStage::Trust => Some(RootCause::CertificatePath),
            FailureStage::Bug => Some(RootCause::Bug),
            FailureStage::Connect | FailureStage::Handshake => None,
        };
    }
    None
}

fn classify_rustls(err: &rustls::Error) -> RootCause {
    use rustls::Error::*;
    match err {
        InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => RootCause::HostnameMismatch,
        InvalidCertificate(_) => RootCause::CertificatePath,
        AlertReceived(_) | PeerIncompatible(_) => RootCause::HandshakeRejected,
        InappropriateMessage { .. } | InappropriateHandshakeMessage { .. } => {
            RootCause::Tls("unexpected message")
        }
        InvalidMessage(_) => RootCause::Tls("invalid message"),
        PeerMisbehaved(_) => RootCause::Tls("peer misbehaved"),
        DecryptError => RootCause::Tls("decrypt error"),
        NoCertificatesPresented => RootCause::Tls("no certificates presented"),
        NoApplicationProtocol => RootCause::Tls("no application protocol"),
        PeerSentOversizedRecord => RootCause::Tls("oversized record"),
        General(_) => RootCause::Tls("general"),
        _ => RootCause::Tls("other"),
    }
}

/// 原因链中对端发来的告警。
pub(crate) fn received_alert(err: &(dyn Error + 'static)) -> Option<AlertDescription> {
    let mut current = Some(err);
    while let Some(node) = current {
        if let Some(rustls::Error::AlertReceived(alert)) = node.downcast_ref::<rustls::Error>() {
            return Some(*alert);
        }
        current = next_cause(node);
    }
    None
}

fn classify_io(kind: io::ErrorKind) -> RootCause {
    match kind {
        io::ErrorKind::UnexpectedEof => RootCause::UnexpectedEof,
        io::ErrorKind::ConnectionRefused => RootCause::ConnectionRefused,
        io::ErrorKind::TimedOut => RootCause::Timeout,
        other => RootCause::Io(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HANDSHAKE, map_stage_error};

    #[test]
    fn nested_rustls_error_is_found_through_io_wrapper() {
        let err = map_stage_error(
            HANDSHAKE,
            io::Error::new(
                io::ErrorKind::InvalidData,
                rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
            ),
        );
        let blame = blame(&err);
        assert_eq!(blame.cause, RootCause::CertificatePath);
        assert!(root_cause_of(&err).is::<rustls::Error>());
    }

    #[test]
    fn opaque_io_payload_falls_back_to_kind() {
        let err = map_stage_error(
            HANDSHAKE,
            io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"),
        );
        assert_eq!(blame(&err).cause, RootCause::UnexpectedEof);
    }

    #[test]
    fn every_received_alert_is_a_rejection() {
        for alert in [
            AlertDescription::HandshakeFailure,
            AlertDescription::AccessDenied,
            AlertDescription::CertificateRequired,
            AlertDescription::UnknownCA,
            AlertDescription::BadCertificate,
            AlertDescription::InternalError,
        ] {
            let err = map_stage_error(
                HANDSHAKE,
                io::Error::new(io::ErrorKind::InvalidData, rustls::Error::AlertReceived(alert)),
            );
            assert_eq!(blame(&err).cause, RootCause::HandshakeRejected, "{alert:?}");
            assert_eq!(received_alert(&err), Some(alert));
        }
    }

    #[test]
    fn varying_text_keeps_the_same_cause() {
        let first = map_stage_error(
            HANDSHAKE,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset by 10.0.0.1"),
        );
        let second = map_stage_error(
            HANDSHAKE,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset by 10.0.0.2"),
        );
        assert_eq!(blame(&first).cause, RootCause::Io(io::ErrorKind::ConnectionReset));
        assert_eq!(blame(&first).cause, blame(&second).cause);
        assert_ne!(blame(&first).message, blame(&second).message);

        let first = rustls::Error::General("bad state 1".into());
        let second = rustls::Error::General("bad state 2".into());
        assert_eq!(blame(&first).cause, blame(&second).cause);
    }

    #[test]
    fn causeless_probe_error_uses_stage() {
        let err = ProbeError::new("x", FailureStage::Hostname, "mismatch");
        assert_eq!(blame(&err).cause, RootCause::HostnameMismatch);
        let err = ProbeError::new("x", FailureStage::Handshake, "odd");
        let resolved = blame(&err);
        assert_eq!(resolved.cause, RootCause::Other);
        assert_eq!(resolved.message, "[handshake] odd");
    }

    #[test]
    fn root_causes_sort_deterministically() {
        let mut causes = vec![
            RootCause::Timeout,
            RootCause::CertificatePath,
            RootCause::Io(io::ErrorKind::BrokenPipe),
            RootCause::HandshakeRejected,
        ];
        causes.sort();
        assert_eq!(causes[0], RootCause::CertificatePath);
        assert_eq!(causes[1], RootCause::HandshakeRejected);
    }
}
