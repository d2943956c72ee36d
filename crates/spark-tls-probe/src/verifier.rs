//! 证书校验的旁路捕获。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手失败后，报告器需要知道对端实际发送了哪条证书链、密钥类型是什么、信任判定为何失败；
//!   这些信息只在校验回调中可见，握手失败后 `rustls` 不再暴露。
//! - [`CapturingVerifier`] 包装 `rustls` 的 WebPKI 校验器，不改变信任判定，只把
//!   `(chain, auth_type, verdict)` 记录到本次尝试的 [`VerificationCapture`]，并转交可选的用户回调。
//!
//! ## 契约（What）
//! - 链校验失败：记录 [`Verdict::Untrusted`] 并原样返回错误，握手随之失败；
//! - 仅主机名不匹配：记录 [`Verdict::NameMismatch`] 并放行，是否判定失败交给独立的主机名阶段；
//! - 签名校验（TLS 1.2/1.3）与支持的签名方案全部委托给内层校验器。
//!
//! ## 风险与权衡（Trade-offs）
//! - WebPKI 先校验链、后校验名称，因此 `NotValidForName` 意味着链本身已被信任，放行是安全的；
//! - 捕获使用 `std::sync::Mutex`，锁内只做赋值，不会跨 `.await` 持有。

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use rustls::{
    CertificateError, DigitallySignedStruct, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::{
    oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION, OID_SIG_ED25519},
    prelude::*,
};

/// 由叶子证书公钥推导出的认证类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// RSA 公钥。
    Rsa,
    /// 椭圆曲线公钥（ECDSA）。
    Ec,
    /// Ed25519 公钥。
    Ed25519,
    /// 无法识别或无法解析。
    Unknown,
}

impl AuthType {
    /// 解析叶子证书的公钥算法。
    pub fn of_leaf(leaf: &CertificateDer<'_>) -> Self {
        let Ok((_, cert)) = X509Certificate::from_der(leaf.as_ref()) else {
            return AuthType::Unknown;
        };
        let algorithm = &cert.public_key().algorithm.algorithm;
        if *algorithm == OID_PKCS1_RSAENCRYPTION {
            AuthType::Rsa
        } else if *algorithm == OID_KEY_TYPE_EC_PUBLIC_KEY {
            AuthType::Ec
        } else if *algorithm == OID_SIG_ED25519 {
            AuthType::Ed25519
        } else {
            AuthType::Unknown
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthType::Rsa => "RSA",
            AuthType::Ec => "EC",
            AuthType::Ed25519 => "Ed25519",
            AuthType::Unknown => "unknown",
        })
    }
}

/// 一次证书校验的结论。
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// 链与名称均通过。
    Trusted,
    /// 链被信任，但名称不匹配；握手继续。
    NameMismatch(rustls::Error),
    /// 链未被信任。
    Untrusted(rustls::Error),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Trusted => f.write_str("trusted"),
            Verdict::NameMismatch(err) => write!(f, "trusted chain, name mismatch: {err}"),
            Verdict::Untrusted(err) => write!(f, "untrusted: {err}"),
        }
    }
}

/// 用户提供的校验回调。
pub type VerificationCallback =
    Arc<dyn Fn(&[CertificateDer<'static>], AuthType, &Verdict) + Send + Sync>;

/// 单次尝试中捕获的校验信息。
#[derive(Debug, Default)]
pub struct VerificationCapture {
    inner: Mutex<Option<Captured>>,
}

#[derive(Debug, Clone)]
struct Captured {
    chain: Vec<CertificateDer<'static>>,
    auth_type: AuthType,
    verdict: Verdict,
}

impl VerificationCapture {
    /// 创建空的捕获。
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, captured: Captured) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(captured);
    }

    fn snapshot(&self) -> Option<Captured> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 对端证书链（叶子在前）。
    pub fn chain(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.snapshot().map(|captured| captured.chain)
    }

    /// 认证类型。
    pub fn auth_type(&self) -> Option<AuthType> {
        self.snapshot().map(|captured| captured.auth_type)
    }

    /// 校验结论。
    pub fn verdict(&self) -> Option<Verdict> {
        self.snapshot().map(|captured| captured.verdict)
    }
}

/// 包装内层校验器并捕获判定。
pub struct CapturingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    capture: Arc<VerificationCapture>,
    callback: Option<VerificationCallback>,
}

impl CapturingVerifier {
    /// 包装内层校验器。
    pub fn new(
        inner: Arc<WebPkiServerVerifier>,
        capture: Arc<VerificationCapture>,
        callback: Option<VerificationCallback>,
    ) -> Self {
        Self {
            inner,
            capture,
            callback,
        }
    }
}

impl fmt::Debug for CapturingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturingVerifier")
            .field("inner", &self.inner)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn is_name_error(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

impl ServerCertVerifier for CapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<CertificateDer<'static>> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.clone().into_owned())
            .collect();
        let auth_type = AuthType::of_leaf(end_entity);

        let verdict = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(_) => Verdict::Trusted,
            Err(err) if is_name_error(&err) => Verdict::NameMismatch(err),
            Err(err) => Verdict::Untrusted(err),
        };
        tracing::debug!(chain_len = chain.len(), %auth_type, %verdict, "peer certificate verified");

        if let Some(callback) = &self.callback {
            callback(&chain, auth_type, &verdict);
        }
        self.capture.record(Captured {
            chain,
            auth_type,
            verdict: verdict.clone(),
        });

        match verdict {
            Verdict::Trusted | Verdict::NameMismatch(_) => Ok(ServerCertVerified::assertion()),
            Verdict::Untrusted(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rustls::RootCertStore;

    use super::*;

    fn webpki(roots: RootCertStore) -> Arc<WebPkiServerVerifier> {
        WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn untrusted_chain_is_captured_and_rejected() {
        let trusted = rcgen::generate_simple_self_signed(vec!["trusted.test".to_string()]).unwrap();
        let stranger = rcgen::generate_simple_self_signed(vec!["peer.test".to_string()]).unwrap();
        let mut roots = RootCertStore::empty();
        roots.add(trusted.cert.der().clone()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let callback: VerificationCallback = Arc::new(
            move |chain: &[CertificateDer<'static>], auth_type: AuthType, verdict: &Verdict| {
                assert_eq!(chain.len(), 1);
                assert_eq!(auth_type, AuthType::Ec);
                assert!(matches!(verdict, Verdict::Untrusted(_)));
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        let capture = Arc::new(VerificationCapture::new());
        let verifier = CapturingVerifier::new(webpki(roots), capture.clone(), Some(callback));
        let result = verifier.verify_server_cert(
            stranger.cert.der(),
            &[],
            &ServerName::try_from("peer.test").unwrap(),
            &[],
            UnixTime::now(),
        );

        assert!(matches!(
            result,
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(capture.chain().map(|chain| chain.len()), Some(1));
        assert!(matches!(capture.verdict(), Some(Verdict::Untrusted(_))));
    }

    #[test]
    fn name_mismatch_is_recorded_but_accepted() {
        let certified = rcgen::generate_simple_self_signed(vec!["real.test".to_string()]).unwrap();
        let mut roots = RootCertStore::empty();
        roots.add(certified.cert.der().clone()).unwrap();

        let capture = Arc::new(VerificationCapture::new());
        let verifier = CapturingVerifier::new(webpki(roots), capture.clone(), None);
        let result = verifier.verify_server_cert(
            certified.cert.der(),
            &[],
            &ServerName::try_from("other.test").unwrap(),
            &[],
            UnixTime::now(),
        );

        assert!(result.is_ok());
        assert!(matches!(capture.verdict(), Some(Verdict::NameMismatch(_))));
        assert_eq!(capture.auth_type(), Some(AuthType::Ec));
    }
}
