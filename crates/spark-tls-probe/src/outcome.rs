//! 单次尝试的不可变结果。

use std::{fmt, net::SocketAddr, time::Duration};

use rustls_pki_types::CertificateDer;
use spark_tls_wire::{CipherSuite, ProtocolVersion};

use crate::{
    error::ProbeError, hostname::HostnameCheck, observer::ForensicReport, verifier::AuthType,
    verifier::Verdict,
};

/// 被探测的端点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// 地址与端口。
    pub address: SocketAddr,
    /// 期望的主机名（SNI 与主机名校验使用）。
    pub hostname: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.hostname)
    }
}

/// 握手完成后协商出的会话参数。
///
/// `rustls` 可能协商出本地枚举未收录的取值，此时对应字段为 `None`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// 协议版本。
    pub protocol: Option<ProtocolVersion>,
    /// 密码套件。
    pub cipher_suite: Option<CipherSuite>,
    /// 协商出的 ALPN 协议。
    pub alpn: Option<Vec<u8>>,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Some(protocol) => write!(f, "{protocol}")?,
            None => f.write_str("unknown protocol")?,
        }
        match self.cipher_suite {
            Some(suite) => write!(f, " {suite}")?,
            None => f.write_str(" unknown suite")?,
        }
        if let Some(alpn) = &self.alpn {
            write!(f, " alpn={}", String::from_utf8_lossy(alpn))?;
        }
        Ok(())
    }
}

/// 对端发送的证书链。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChain {
    /// 证书，叶子在前。
    pub certificates: Vec<CertificateDer<'static>>,
    /// 叶子公钥推导出的认证类型。
    pub auth_type: AuthType,
}

/// 一次尝试的结果。
///
/// 由 [`crate::Checker`] 一次性构造，之后只读。
#[derive(Debug)]
pub struct Outcome {
    pub(crate) endpoint: Endpoint,
    pub(crate) session: Option<SessionInfo>,
    pub(crate) peer_chain: Option<PeerChain>,
    pub(crate) verdict: Option<Verdict>,
    pub(crate) hostname_check: HostnameCheck,
    pub(crate) error: Option<ProbeError>,
    pub(crate) forensics: Option<ForensicReport>,
    pub(crate) elapsed: Duration,
}

impl Outcome {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: None,
            peer_chain: None,
            verdict: None,
            hostname_check: HostnameCheck::Skipped,
            error: None,
            forensics: None,
            elapsed: Duration::ZERO,
        }
    }

    /// 端点。
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 握手完成时的会话参数。
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// 对端证书链；对端未发送证书（或在此之前失败）时为 `None`。
    pub fn peer_chain(&self) -> Option<&PeerChain> {
        self.peer_chain.as_ref()
    }

    /// 校验器给出的完整结论。
    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// 信任失败原因。
    pub fn trust_failure(&self) -> Option<&rustls::Error> {
        match &self.verdict {
            Some(Verdict::Untrusted(err)) => Some(err),
            _ => None,
        }
    }

    /// 链被信任但名称不匹配时的观察记录；不影响 [`Outcome::success`]。
    pub fn name_mismatch(&self) -> Option<&rustls::Error> {
        match &self.verdict {
            Some(Verdict::NameMismatch(err)) => Some(err),
            _ => None,
        }
    }

    /// 主机名校验结论。
    pub fn hostname_check(&self) -> &HostnameCheck {
        &self.hostname_check
    }

    /// 终止错误。
    pub fn error(&self) -> Option<&ProbeError> {
        self.error.as_ref()
    }

    /// 失败时的取证回放。
    pub fn forensics(&self) -> Option<&ForensicReport> {
        self.forensics.as_ref()
    }

    /// 本次尝试耗时。
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// 没有终止错误且没有信任失败。
    pub fn success(&self) -> bool {
        self.error.is_none() && self.trust_failure().is_none()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.endpoint)?;
        match (&self.error, &self.session) {
            (Some(err), _) => write!(f, "FAILED {err}")?,
            (None, Some(session)) => write!(f, "ok {session}")?,
            (None, None) => f.write_str("ok")?,
        }
        write!(f, " in {} ms", self.elapsed.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TRUST, map_stage_error};

    fn endpoint() -> Endpoint {
        Endpoint {
            address: "127.0.0.1:443".parse().unwrap(),
            hostname: "probe.test".into(),
        }
    }

    #[test]
    fn trust_failure_alone_is_not_success() {
        let mut outcome = Outcome::new(endpoint());
        assert!(outcome.success());
        outcome.verdict = Some(Verdict::Untrusted(rustls::Error::General("x".into())));
        assert!(!outcome.success());
    }

    #[test]
    fn name_mismatch_is_an_observation() {
        let mut outcome = Outcome::new(endpoint());
        outcome.verdict = Some(Verdict::NameMismatch(rustls::Error::InvalidCertificate(
            rustls::CertificateError::NotValidForName,
        )));
        assert!(outcome.success());
        assert!(outcome.name_mismatch().is_some());
        assert!(outcome.trust_failure().is_none());
    }

    #[test]
    fn display_mentions_failure_stage() {
        let mut outcome = Outcome::new(endpoint());
        outcome.error = Some(map_stage_error(TRUST, rustls::Error::General("boom".into())));
        let text = outcome.to_string();
        assert!(text.starts_with("127.0.0.1:443 (probe.test): FAILED [trust]"), "{text}");
    }
}
