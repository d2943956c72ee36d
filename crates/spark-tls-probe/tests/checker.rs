//! 连通性检查端到端场景：真实套接字、进程内服务端与伪造对端。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 每个场景对应一种线上常见的 TLS 失败：信任链不通、端口不通、对端拒绝握手、对端不是 TLS 服务；
//!   断言覆盖“失败阶段 → 根因 → 诊断”的完整链路，而不只是“握手失败了”。
//!
//! ## 策略（How）
//! - PKI 由 rcgen 现场生成，服务端为 tokio-rustls，伪造对端只回写固定字节；
//! - 所有端口均绑定 `127.0.0.1:0`，测试之间互不干扰。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use rustls::pki_types::CertificateDer;
use spark_tls_probe::{
    AuthType, ChainFinding, Checker, ConfigError, Diagnosis, FailureStage, ForensicEvent,
    HostnameCheck, MemoryTrustStore, ProbeConfig, Reporter, RootCause, Verdict,
    VerificationCallback, blame,
};
use spark_tls_wire::{CipherSuite, ContentType, ProtocolVersion};
use support::{Authority, refused_address, spawn_scripted_peer, spawn_tls_server};

const FATAL_HANDSHAKE_FAILURE: &[u8] = &[21, 3, 3, 0, 2, 2, 40];
const FATAL_ACCESS_DENIED: &[u8] = &[21, 3, 3, 0, 2, 2, 49];

fn trusting(authority: &Authority) -> Result<ProbeConfig> {
    let store = MemoryTrustStore::from_der("configured", [authority.der()])?;
    Ok(ProbeConfig::default()
        .with_trust_store(Arc::new(store))
        .with_timeout(Duration::from_secs(5)))
}

#[tokio::test(flavor = "multi_thread")]
async fn trusted_server_succeeds_with_session_details() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let addr = spawn_tls_server(authority.issue(&["localhost"])?).await?;

    let checker = Checker::new(trusting(&authority)?)?;
    let outcome = checker.check(addr, "localhost").await;

    assert!(outcome.success(), "{outcome}");
    let session = outcome.session().context("握手完成后应有会话信息")?;
    assert_eq!(session.protocol, Some(ProtocolVersion::Tls1_3));
    assert!(session.cipher_suite.is_some_and(CipherSuite::is_tls13));
    assert_eq!(outcome.verdict(), Some(&Verdict::Trusted));
    assert_eq!(outcome.hostname_check(), &HostnameCheck::Skipped);
    let chain = outcome.peer_chain().context("应捕获对端证书链")?;
    assert_eq!(chain.certificates.len(), 1);
    assert_eq!(chain.auth_type, AuthType::Ec);
    assert!(outcome.forensics().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tls12_only_offer_negotiates_tls12() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let addr = spawn_tls_server(authority.issue(&["localhost"])?).await?;

    let config = trusting(&authority)?.with_protocols([ProtocolVersion::Tls1_2]);
    let outcome = Checker::new(config)?.check(addr, "localhost").await;

    assert!(outcome.success(), "{outcome}");
    let session = outcome.session().context("会话信息缺失")?;
    assert_eq!(session.protocol, Some(ProtocolVersion::Tls1_2));
    assert!(session.cipher_suite.is_some_and(|suite| !suite.is_tls13()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn untrusted_authority_is_a_certificate_path_failure() -> Result<()> {
    let server_ca = Authority::new("Server Side CA")?;
    let client_ca = Authority::new("Client Side CA")?;
    let addr = spawn_tls_server(server_ca.issue(&["localhost"])?).await?;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let callback: VerificationCallback = Arc::new(
        move |chain: &[CertificateDer<'static>], _auth: AuthType, verdict: &Verdict| {
            assert_eq!(chain.len(), 1);
            assert!(matches!(verdict, Verdict::Untrusted(_)));
            seen.fetch_add(1, Ordering::SeqCst);
        },
    );
    let config = trusting(&client_ca)?.with_verification_callback(callback);
    let outcome = Checker::new(config.clone())?.check(addr, "localhost").await;

    assert!(!outcome.success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let error = outcome.error().context("应记录终止错误")?;
    assert_eq!(error.stage(), FailureStage::Trust);
    assert_eq!(error.code(), "spark.tls.probe.untrusted_chain");
    assert!(outcome.trust_failure().is_some());
    assert_eq!(blame(error).cause, RootCause::CertificatePath);

    let report = Reporter::new(&config).analyze(std::slice::from_ref(&outcome));
    let group = &report.groups()[0];
    assert_eq!(group.cause, RootCause::CertificatePath);
    assert_eq!(group.addresses, vec![addr]);
    let Diagnosis::CertificatePath {
        analysis,
        trust_stores,
    } = &group.diagnosis
    else {
        panic!("expected certificate path diagnosis, got {:?}", group.diagnosis);
    };
    assert_eq!(trust_stores[0], ("configured".to_string(), 1));
    assert_eq!(trust_stores[1].0, "platform");
    let analysis = analysis.as_ref().context("应附带链分析")?;
    assert!(analysis.findings.contains(&ChainFinding::MissingTrustAnchor {
        issuer: "Server Side CA".into(),
        found: None,
    }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_alert_is_a_rejection_with_offer_listed() -> Result<()> {
    let addr = spawn_scripted_peer(FATAL_HANDSHAKE_FAILURE, true).await?;
    let config = ProbeConfig::default()
        .with_protocols([ProtocolVersion::Tls1_2])
        .with_cipher_suites([CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256])
        .with_timeout(Duration::from_secs(5));

    let outcome = Checker::new(config.clone())?.check(addr, "legacy.test").await;

    let error = outcome.error().context("对端拒绝应导致失败")?;
    assert_eq!(error.stage(), FailureStage::Handshake);
    let forensics = outcome.forensics().context("失败时应回放取证")?;
    assert!(forensics.entries().iter().any(|entry| matches!(
        entry.event,
        ForensicEvent::Record {
            content_type: ContentType::Alert,
            ..
        }
    )));

    let report = Reporter::new(&config).analyze(std::slice::from_ref(&outcome));
    let group = &report.groups()[0];
    assert_eq!(group.cause, RootCause::HandshakeRejected);
    let Diagnosis::HandshakeRejected {
        protocols,
        cipher_suites,
        peer_alerts,
    } = &group.diagnosis
    else {
        panic!("expected rejection diagnosis, got {:?}", group.diagnosis);
    };
    assert_eq!(protocols, &[ProtocolVersion::Tls1_2]);
    assert_eq!(
        cipher_suites,
        &[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]
    );
    assert_eq!(peer_alerts, &["fatal handshake_failure".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn any_fatal_alert_is_a_rejection() -> Result<()> {
    let addr = spawn_scripted_peer(FATAL_ACCESS_DENIED, true).await?;
    let config = ProbeConfig::default()
        .with_protocols([ProtocolVersion::Tls1_2])
        .with_observe(false)
        .with_timeout(Duration::from_secs(5));

    let outcome = Checker::new(config.clone())?.check(addr, "guarded.test").await;

    let error = outcome.error().context("对端告警应导致失败")?;
    assert_eq!(blame(error).cause, RootCause::HandshakeRejected);
    assert!(outcome.forensics().is_none());

    let report = Reporter::new(&config).analyze(std::slice::from_ref(&outcome));
    let Diagnosis::HandshakeRejected {
        protocols,
        peer_alerts,
        ..
    } = &report.groups()[0].diagnosis
    else {
        panic!("expected rejection diagnosis, got {:?}", report.groups()[0].diagnosis);
    };
    assert_eq!(protocols, &[ProtocolVersion::Tls1_2]);
    assert_eq!(peer_alerts, &["fatal access_denied".to_string()]);
    Ok(())
}

/// 服务端持 EC 证书，本端只提供 RSA 认证的套件：双方没有共同套件，服务端以 handshake_failure 拒绝。
#[tokio::test(flavor = "multi_thread")]
async fn suite_the_server_cannot_use_is_rejected_with_offer_listed() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let addr = spawn_tls_server(authority.issue(&["localhost"])?).await?;

    let config = trusting(&authority)?
        .with_protocols([ProtocolVersion::Tls1_2])
        .with_cipher_suites([CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
    let outcome = Checker::new(config.clone())?.check(addr, "localhost").await;

    assert!(!outcome.success());
    let error = outcome.error().context("无共同套件应导致失败")?;
    assert_eq!(error.stage(), FailureStage::Handshake);
    assert_eq!(blame(error).cause, RootCause::HandshakeRejected);

    let report = Reporter::new(&config).analyze(std::slice::from_ref(&outcome));
    let Diagnosis::HandshakeRejected {
        cipher_suites,
        peer_alerts,
        ..
    } = &report.groups()[0].diagnosis
    else {
        panic!("expected rejection diagnosis, got {:?}", report.groups()[0].diagnosis);
    };
    assert_eq!(
        cipher_suites,
        &[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]
    );
    assert_eq!(peer_alerts, &["fatal handshake_failure".to_string()]);
    assert!(report.to_string().contains("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_close_is_an_unexpected_eof() -> Result<()> {
    let addr = spawn_scripted_peer(&[], false).await?;
    let config = ProbeConfig::default().with_timeout(Duration::from_secs(5));
    let outcome = Checker::new(config.clone())?.check(addr, "plain.test").await;

    let error = outcome.error().context("对端关闭应导致失败")?;
    assert_eq!(blame(error).cause, RootCause::UnexpectedEof);
    let forensics = outcome.forensics().context("失败时应回放取证")?;
    assert!(forensics.to_string().contains("client_hello"), "{forensics}");

    let report = Reporter::new(&config).analyze(std::slice::from_ref(&outcome));
    assert!(matches!(
        report.groups()[0].diagnosis,
        Diagnosis::UnexpectedEof { .. }
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn check_all_keeps_input_order_and_isolates_failures() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let good = spawn_tls_server(authority.issue(&["localhost"])?).await?;
    let refused = refused_address().await?;

    let config = trusting(&authority)?.with_concurrency(2);
    let checker = Checker::new(config.clone())?;
    let addresses = [refused, good, refused, good];
    let outcomes = checker.check_all(&addresses, "localhost").await;

    assert_eq!(outcomes.len(), addresses.len());
    for (outcome, address) in outcomes.iter().zip(addresses) {
        assert_eq!(outcome.endpoint().address, address);
    }
    assert!(!outcomes[0].success());
    assert!(outcomes[1].success(), "{}", outcomes[1]);
    let error = outcomes[2].error().context("拒绝连接应失败")?;
    assert_eq!(error.stage(), FailureStage::Connect);
    assert_eq!(blame(error).cause, RootCause::ConnectionRefused);

    let report = Reporter::new(&config).analyze(&outcomes);
    assert_eq!(report.groups().len(), 1);
    assert_eq!(report.groups()[0].addresses, vec![refused, refused]);
    assert_eq!(report.successes().len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn hostname_stage_is_optional() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let addr = spawn_tls_server(authority.issue(&["localhost"])?).await?;

    let lenient = Checker::new(trusting(&authority)?)?
        .check(addr, "elsewhere.test")
        .await;
    assert!(lenient.success(), "{lenient}");
    assert!(lenient.name_mismatch().is_some());

    let strict = Checker::new(trusting(&authority)?.with_verify_hostname(true))?
        .check(addr, "elsewhere.test")
        .await;
    let error = strict.error().context("开启校验后应失败")?;
    assert_eq!(error.stage(), FailureStage::Hostname);
    assert_eq!(blame(error).cause, RootCause::HostnameMismatch);
    assert!(matches!(
        strict.hostname_check(),
        HostnameCheck::Failed { presented, .. } if presented == &["DNS:localhost".to_string()]
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn undersized_mirror_is_reported_as_bug() -> Result<()> {
    let authority = Authority::new("Probe Test CA")?;
    let addr = spawn_tls_server(authority.issue(&["localhost"])?).await?;

    let config = trusting(&authority)?.with_mirror_capacity(32);
    let outcome = Checker::new(config)?.check(addr, "localhost").await;

    let error = outcome.error().context("镜像溢出应失败")?;
    assert_eq!(error.stage(), FailureStage::Bug);
    assert_eq!(blame(error).cause, RootCause::Bug);
    Ok(())
}

#[test]
fn unsupported_suite_is_a_configuration_problem() {
    let config = ProbeConfig::default()
        .with_cipher_suites([CipherSuite::TLS_RSA_EXPORT_WITH_RC4_40_MD5]);
    assert!(matches!(
        Checker::new(config),
        Err(ConfigError::UnsupportedCipherSuite(
            CipherSuite::TLS_RSA_EXPORT_WITH_RC4_40_MD5
        ))
    ));
}
