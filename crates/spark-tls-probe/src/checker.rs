//! 连通性检查：对每个地址执行“连接 → 握手 → 信任捕获 → 主机名校验”。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 一个主机名通常解析出多个地址，而故障往往只出现在其中一部分；逐地址检查并保留输入顺序，
//!   报告才能指出“哪几台节点、因为什么”失败。
//!
//! ## 逻辑（How）
//! 1. `Connect`：`TcpStream::connect` 受 `connect_timeout` 约束；
//! 2. `Handshake`：每次尝试克隆基础 `ClientConfig` 并换上绑定本次捕获的 [`CapturingVerifier`]，
//!    由 [`crate::engine`] 的显式循环驱动 `ClientConnection`；开启观测时套接字包装为 [`ObservedStream`]；
//! 3. `Trust`：校验器判定链不可信时握手失败，错误归入信任阶段；
//! 4. `Hostname`：握手成功后交给配置的 [`crate::HostnameVerifier`]，默认跳过。
//!
//! ## 契约（What）
//! - [`Checker::check_all`] 对每个地址恰好产出一个 [`Outcome`]，顺序与输入一致，最多
//!   [`ProbeConfig::concurrency`] 个尝试同时进行；
//! - 任何一个地址的失败都不会中止其他地址；
//! - 会话恢复被禁用，每次尝试都是完整握手，观测器总能看到完整的明文阶段。

use std::{
    io,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{StreamExt, stream};
use rustls::{
    ClientConfig, ClientConnection,
    client::{Resumption, WebPkiServerVerifier},
};
use rustls_pki_types::ServerName;
use spark_tls_wire::{CipherSuite, ProtocolVersion};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tracing::Instrument;

use crate::{
    config::{ConfigError, ProbeConfig},
    engine::{HandshakeBuffers, HandshakeEngine, drive_with_buffers, flush_cipher},
    error::{
        CONNECT, HANDSHAKE, HOSTNAME, OBSERVER_BUG, ProbeError, TRUST, map_stage_error,
        timeout_error,
    },
    hostname::HostnameCheck,
    observer::{MirrorOverflow, ObservedStream},
    outcome::{Endpoint, Outcome, PeerChain, SessionInfo},
    trust::{PlatformTrustStore, TrustStore},
    verifier::{AuthType, CapturingVerifier, VerificationCapture, Verdict},
};

/// 连通性检查器。
///
/// 构造时一次性完成配置翻译，之后所有尝试只读共享。
#[derive(Debug, Clone)]
pub struct Checker {
    config: Arc<ProbeConfig>,
    tls: Arc<ClientConfig>,
    webpki: Arc<WebPkiServerVerifier>,
}

impl Checker {
    /// 由探测参数构建检查器。
    ///
    /// # 错误
    /// - 协议或套件不被加密后端支持、信任库无法构成校验器、客户端身份被拒绝时返回 [`ConfigError`]。
    pub fn new(config: ProbeConfig) -> Result<Self, ConfigError> {
        let provider = Arc::new(config.crypto_provider()?);
        let versions = config.rustls_versions()?;
        let roots = match config.trust_store() {
            Some(store) => store.root_store(),
            None => PlatformTrustStore::new().root_store(),
        };
        let webpki =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;

        // 每次尝试都会换上自己的捕获校验器，这里的实例只用于完成构建。
        let placeholder = Arc::new(CapturingVerifier::new(
            webpki.clone(),
            Arc::new(VerificationCapture::new()),
            None,
        ));
        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)?
            .dangerous()
            .with_custom_certificate_verifier(placeholder);
        let mut tls = match config.identity() {
            Some(identity) => builder
                .with_client_auth_cert(identity.chain().to_vec(), identity.key().clone_key())?,
            None => builder.with_no_client_auth(),
        };
        tls.alpn_protocols = config.alpn_protocols().to_vec();
        tls.resumption = Resumption::disabled();

        tracing::debug!(?config, "checker configured");
        Ok(Self {
            config: Arc::new(config),
            tls: Arc::new(tls),
            webpki,
        })
    }

    /// 探测参数。
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// 检查单个地址。
    pub async fn check(&self, address: SocketAddr, hostname: &str) -> Outcome {
        let span = tracing::info_span!("tls_check", %address, hostname);
        self.attempt(address, hostname).instrument(span).await
    }

    /// 检查全部地址，结果顺序与输入一致。
    pub async fn check_all(&self, addresses: &[SocketAddr], hostname: &str) -> Vec<Outcome> {
        stream::iter(addresses.iter().copied())
            .map(|address| self.check(address, hostname))
            .buffered(self.config.concurrency())
            .collect()
            .await
    }

    async fn attempt(&self, address: SocketAddr, hostname: &str) -> Outcome {
        let started = Instant::now();
        let mut outcome = Outcome::new(Endpoint {
            address,
            hostname: hostname.to_owned(),
        });
        match self.run(&mut outcome).await {
            Ok(()) => tracing::debug!(
                session = ?outcome.session,
                hostname_check = %outcome.hostname_check,
                "attempt succeeded"
            ),
            Err(error) => {
                tracing::warn!(
                    code = error.code(),
                    stage = %error.stage(),
                    %error,
                    "attempt failed"
                );
                outcome.error = Some(error);
            }
        }
        outcome.elapsed = started.elapsed();
        outcome
    }

    async fn run(&self, outcome: &mut Outcome) -> Result<(), ProbeError> {
        let address = outcome.endpoint.address;
        let connect_timeout = self.config.connect_timeout();
        tracing::debug!("connecting");
        let tcp = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(err)) => return Err(map_stage_error(CONNECT, err)),
            Err(_) => return Err(timeout_error(CONNECT, connect_timeout)),
        };

        let server_name = ServerName::try_from(outcome.endpoint.hostname.clone())
            .map_err(|err| map_stage_error(HANDSHAKE, err))?;
        let capture = Arc::new(VerificationCapture::new());
        let mut tls = (*self.tls).clone();
        tls.dangerous().set_certificate_verifier(Arc::new(CapturingVerifier::new(
            self.webpki.clone(),
            capture.clone(),
            self.config.verification_callback().cloned(),
        )));
        let mut conn = ClientConnection::new(Arc::new(tls), server_name)
            .map_err(|err| map_stage_error(HANDSHAKE, err))?;

        tracing::debug!("handshaking");
        let io_timeout = self.config.read_timeout();
        let result = if self.config.observe() {
            let mut observed = ObservedStream::new(tcp, self.config.mirror_capacity());
            let result = handshake(&mut conn, &mut observed, io_timeout).await;
            if result.is_err() {
                let report = observed.journal().replay();
                for entry in report.entries() {
                    tracing::info!(%address, "{entry}");
                }
                outcome.forensics = Some(report);
            }
            result
        } else {
            let mut tcp = tcp;
            handshake(&mut conn, &mut tcp, io_timeout).await
        };

        if let Some(chain) = capture.chain() {
            outcome.peer_chain = Some(PeerChain {
                certificates: chain,
                auth_type: capture.auth_type().unwrap_or(AuthType::Unknown),
            });
        }
        outcome.verdict = capture.verdict();

        if let Err(err) = result {
            return Err(self.classify_handshake_error(outcome.verdict.as_ref(), err));
        }

        outcome.session = Some(session_info(&conn));
        self.verify_hostname(outcome)
    }

    fn classify_handshake_error(&self, verdict: Option<&Verdict>, err: io::Error) -> ProbeError {
        let overflow = err
            .get_ref()
            .is_some_and(|inner| inner.is::<MirrorOverflow>());
        if overflow {
            map_stage_error(OBSERVER_BUG, err)
        } else if matches!(verdict, Some(Verdict::Untrusted(_))) {
            map_stage_error(TRUST, err)
        } else if err.kind() == io::ErrorKind::TimedOut {
            timeout_error(HANDSHAKE, self.config.read_timeout())
        } else {
            map_stage_error(HANDSHAKE, err)
        }
    }

    fn verify_hostname(&self, outcome: &mut Outcome) -> Result<(), ProbeError> {
        let Some(leaf) = outcome
            .peer_chain
            .as_ref()
            .and_then(|chain| chain.certificates.first())
        else {
            return Ok(());
        };
        let check = self
            .config
            .hostname_verifier()
            .verify(&outcome.endpoint.hostname, leaf);
        tracing::debug!(%check, "hostname stage");
        outcome.hostname_check = check.clone();
        match check {
            HostnameCheck::Failed { .. } => Err(ProbeError::new(
                HOSTNAME.code,
                HOSTNAME.stage,
                format!("{} failed: {check}", HOSTNAME.message),
            )),
            HostnameCheck::Passed | HostnameCheck::Skipped => Ok(()),
        }
    }
}

/// 完成握手并尽力发送 close_notify。
async fn handshake<S>(
    conn: &mut ClientConnection,
    stream: &mut S,
    io_timeout: Duration,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffers = HandshakeBuffers::default();
    drive_with_buffers(conn, stream, io_timeout, &mut buffers).await?;

    conn.send_close_notify();
    let closed = match conn.wrap(&mut buffers.out_plain, &mut buffers.out_cipher) {
        Ok(()) => flush_cipher(stream, &mut buffers.out_cipher, io_timeout).await,
        Err(err) => Err(err),
    };
    if let Err(err) = closed {
        tracing::debug!(error = %err, "close_notify not delivered");
    }
    Ok(())
}

fn session_info(conn: &ClientConnection) -> SessionInfo {
    SessionInfo {
        protocol: conn
            .protocol_version()
            .and_then(|version| ProtocolVersion::from_code(u16::from(version)).ok()),
        cipher_suite: conn
            .negotiated_cipher_suite()
            .and_then(|suite| CipherSuite::from_code(u16::from(suite.suite())).ok()),
        alpn: conn.alpn_protocol().map(<[u8]>::to_vec),
    }
}
