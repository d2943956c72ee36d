//! 探测配置：显式的、每个 [`crate::Checker`] 独立持有的参数值。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 所有尝试共享的只读参数（信任材料、身份、协议、套件、超时）集中在 [`ProbeConfig`]，
//!   由构造者显式传入，不存在全局默认参数或可变单例。
//! - [`ProbeSettings`] 是同一组参数的 TOML 形态，供命令行入口加载；名称在这里解析并校验，
//!   错误以 [`ConfigError`] 返回。
//!
//! ## 契约（What）
//! - 默认值：连接与读写超时各 1000 ms、协议 {TLSv1.3, TLSv1.2}、套件为空（表示使用加密后端的默认集合）、
//!   顺序执行（并发度 1）、观测器开启、主机名校验关闭、镜像容量 16 KiB；
//! - [`ProbeConfig::rustls_versions`] 与 [`ProbeConfig::crypto_provider`] 把配置翻译为 `rustls` 所需的形态，
//!   任何 `rustls` 不支持的协议或套件都在此处报错，而不是在握手时才暴露。

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use rustls::{SupportedProtocolVersion, crypto::CryptoProvider};
use serde::Deserialize;
use spark_tls_wire::{CipherSuite, ProtocolVersion};
use thiserror::Error;

use crate::{
    DEFAULT_MIRROR_CAPACITY,
    hostname::{DisabledHostnameVerifier, HostnameVerifier, SubjectAltNameVerifier},
    trust::{ClientIdentity, TrustError, TrustStore},
    verifier::VerificationCallback,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// 配置错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 未知的协议名称。
    #[error("unknown protocol version {0:?}")]
    UnknownProtocol(String),
    /// 未知的密码套件名称。
    #[error("unknown cipher suite {0:?}")]
    UnknownCipherSuite(String),
    /// 协议已知，但加密后端不支持。
    #[error("protocol {0} is not supported by the TLS engine")]
    UnsupportedProtocol(ProtocolVersion),
    /// 套件已知，但加密后端不支持。
    #[error("cipher suite {0} is not supported by the TLS engine")]
    UnsupportedCipherSuite(CipherSuite),
    /// 没有启用任何协议。
    #[error("no protocol version enabled")]
    NoProtocols,
    /// 数值非法。
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// 字段名。
        field: &'static str,
        /// 原因。
        reason: &'static str,
    },
    /// TOML 解析失败。
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    /// 信任材料或身份加载失败。
    #[error(transparent)]
    Trust(#[from] TrustError),
    /// 证书校验器无法构建（例如信任库为空）。
    #[error("cannot build certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
    /// TLS 引擎拒绝了配置组合。
    #[error("TLS engine rejected the configuration: {0}")]
    Engine(#[from] rustls::Error),
}

/// 探测参数。
#[derive(Clone)]
pub struct ProbeConfig {
    connect_timeout: Duration,
    read_timeout: Duration,
    protocols: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
    trust_store: Option<Arc<dyn TrustStore>>,
    identity: Option<ClientIdentity>,
    alpn_protocols: Vec<Vec<u8>>,
    hostname_verifier: Arc<dyn HostnameVerifier>,
    verification_callback: Option<VerificationCallback>,
    observe: bool,
    concurrency: usize,
    mirror_capacity: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            protocols: vec![ProtocolVersion::Tls1_3, ProtocolVersion::Tls1_2],
            cipher_suites: Vec::new(),
            trust_store: None,
            identity: None,
            alpn_protocols: Vec::new(),
            hostname_verifier: Arc::new(DisabledHostnameVerifier),
            verification_callback: None,
            observe: true,
            concurrency: 1,
            mirror_capacity: DEFAULT_MIRROR_CAPACITY,
        }
    }
}

impl fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("protocols", &self.protocols)
            .field("cipher_suites", &self.cipher_suites)
            .field("trust_store", &self.trust_store.as_ref().map(|store| store.name()))
            .field("identity", &self.identity)
            .field("hostname_verifier", &self.hostname_verifier)
            .field("verification_callback", &self.verification_callback.is_some())
            .field("observe", &self.observe)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl ProbeConfig {
    /// 设置连接超时。
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 设置握手期间单次读写的超时。
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 同时设置连接与读写超时。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_connect_timeout(timeout).with_read_timeout(timeout)
    }

    /// 设置启用的协议版本。
    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = ProtocolVersion>) -> Self {
        self.protocols = protocols.into_iter().collect();
        self
    }

    /// 设置启用的密码套件；空集合表示使用加密后端的默认集合。
    pub fn with_cipher_suites(mut self, suites: impl IntoIterator<Item = CipherSuite>) -> Self {
        self.cipher_suites = suites.into_iter().collect();
        self
    }

    /// 设置信任库；未设置时使用平台默认集合。
    pub fn with_trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// 设置客户端证书身份。
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// 设置 ALPN 协议列表。
    pub fn with_alpn_protocols(mut self, protocols: impl IntoIterator<Item = Vec<u8>>) -> Self {
        self.alpn_protocols = protocols.into_iter().collect();
        self
    }

    /// 开启或关闭基于 SAN 的主机名校验。
    pub fn with_verify_hostname(mut self, enabled: bool) -> Self {
        self.hostname_verifier = if enabled {
            Arc::new(SubjectAltNameVerifier)
        } else {
            Arc::new(DisabledHostnameVerifier)
        };
        self
    }

    /// 安装自定义主机名校验器。
    pub fn with_hostname_verifier(mut self, verifier: Arc<dyn HostnameVerifier>) -> Self {
        self.hostname_verifier = verifier;
        self
    }

    /// 设置证书校验回调，每次校验都会收到 `(chain, auth_type, verdict)`。
    pub fn with_verification_callback(mut self, callback: VerificationCallback) -> Self {
        self.verification_callback = Some(callback);
        self
    }

    /// 开启或关闭握手观测。
    pub fn with_observe(mut self, observe: bool) -> Self {
        self.observe = observe;
        self
    }

    /// 设置 `check_all` 的最大并发尝试数，至少为 1。
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 设置每个方向的镜像容量。
    pub fn with_mirror_capacity(mut self, capacity: usize) -> Self {
        self.mirror_capacity = capacity;
        self
    }

    /// 连接超时。
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// 读写超时。
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 启用的协议。
    pub fn protocols(&self) -> &[ProtocolVersion] {
        &self.protocols
    }

    /// 显式启用的套件。
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// 配置的信任库。
    pub fn trust_store(&self) -> Option<&Arc<dyn TrustStore>> {
        self.trust_store.as_ref()
    }

    /// 客户端身份。
    pub fn identity(&self) -> Option<&ClientIdentity> {
        self.identity.as_ref()
    }

    /// ALPN 协议列表。
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// 主机名校验器。
    pub fn hostname_verifier(&self) -> &Arc<dyn HostnameVerifier> {
        &self.hostname_verifier
    }

    /// 证书校验回调。
    pub fn verification_callback(&self) -> Option<&VerificationCallback> {
        self.verification_callback.as_ref()
    }

    /// 是否开启观测。
    pub fn observe(&self) -> bool {
        self.observe
    }

    /// 最大并发尝试数。
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 每个方向的镜像容量。
    pub fn mirror_capacity(&self) -> usize {
        self.mirror_capacity
    }

    /// 翻译为 `rustls` 协议版本；`rustls` 只实现 TLS 1.2 与 1.3。
    pub fn rustls_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, ConfigError> {
        if self.protocols.is_empty() {
            return Err(ConfigError::NoProtocols);
        }
        self.protocols
            .iter()
            .map(|protocol| match protocol {
                ProtocolVersion::Tls1_2 => Ok(&rustls::version::TLS12),
                ProtocolVersion::Tls1_3 => Ok(&rustls::version::TLS13),
                other => Err(ConfigError::UnsupportedProtocol(*other)),
            })
            .collect()
    }

    /// 以 AWS-LC 为后端构建加密提供者，并按配置裁剪套件，保持配置中的偏好顺序。
    pub fn crypto_provider(&self) -> Result<CryptoProvider, ConfigError> {
        let mut provider = rustls::crypto::aws_lc_rs::default_provider();
        if self.cipher_suites.is_empty() {
            return Ok(provider);
        }

        let mut selected = Vec::with_capacity(self.cipher_suites.len());
        for wanted in &self.cipher_suites {
            let found = provider
                .cipher_suites
                .iter()
                .find(|suite| u16::from(suite.suite()) == wanted.code())
                .copied()
                .ok_or(ConfigError::UnsupportedCipherSuite(*wanted))?;
            selected.push(found);
        }
        provider.cipher_suites = selected;
        Ok(provider)
    }
}

/// TOML 形态的探测参数。
///
/// ```toml
/// connect_timeout_ms = 1500
/// read_timeout_ms = 1500
/// protocols = ["TLSv1.2"]
/// cipher_suites = ["TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"]
/// trust_pem = "roots.pem"
/// observe = true
/// verify_hostname = false
/// concurrency = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSettings {
    /// 连接超时（毫秒）。
    pub connect_timeout_ms: Option<u64>,
    /// 读写超时（毫秒）。
    pub read_timeout_ms: Option<u64>,
    /// 协议名称，如 `TLSv1.2`。
    #[serde(default)]
    pub protocols: Vec<String>,
    /// IANA 套件名称。
    #[serde(default)]
    pub cipher_suites: Vec<String>,
    /// ALPN 协议。
    #[serde(default)]
    pub alpn: Vec<String>,
    /// PEM 信任库路径，由调用方负责读取。
    pub trust_pem: Option<PathBuf>,
    /// 客户端证书链 PEM 路径。
    pub client_certificate: Option<PathBuf>,
    /// 客户端私钥 PEM 路径。
    pub client_key: Option<PathBuf>,
    /// 是否开启观测。
    pub observe: Option<bool>,
    /// 是否开启主机名校验。
    pub verify_hostname: Option<bool>,
    /// 最大并发尝试数。
    pub concurrency: Option<usize>,
}

impl ProbeSettings {
    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// 把名称与数值合并进 `base`；路径字段留给调用方处理。
    pub fn apply(&self, mut base: ProbeConfig) -> Result<ProbeConfig, ConfigError> {
        if let Some(ms) = self.connect_timeout_ms {
            base = base.with_connect_timeout(positive_millis("connect_timeout_ms", ms)?);
        }
        if let Some(ms) = self.read_timeout_ms {
            base = base.with_read_timeout(positive_millis("read_timeout_ms", ms)?);
        }
        if !self.protocols.is_empty() {
            base = base.with_protocols(parse_protocols(&self.protocols)?);
        }
        if !self.cipher_suites.is_empty() {
            base = base.with_cipher_suites(parse_cipher_suites(&self.cipher_suites)?);
        }
        if !self.alpn.is_empty() {
            base = base.with_alpn_protocols(self.alpn.iter().map(|p| p.as_bytes().to_vec()));
        }
        if let Some(observe) = self.observe {
            base = base.with_observe(observe);
        }
        if let Some(verify) = self.verify_hostname {
            base = base.with_verify_hostname(verify);
        }
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "concurrency",
                    reason: "must be at least 1",
                });
            }
            base = base.with_concurrency(concurrency);
        }
        Ok(base)
    }
}

fn positive_millis(field: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero",
        });
    }
    Ok(Duration::from_millis(ms))
}

/// 按名称解析协议版本（大小写不敏感）。
pub fn parse_protocols(names: &[String]) -> Result<Vec<ProtocolVersion>, ConfigError> {
    names
        .iter()
        .map(|name| {
            ProtocolVersion::from_name(name)
                .ok_or_else(|| ConfigError::UnknownProtocol(name.clone()))
        })
        .collect()
}

/// 按 IANA 名称解析密码套件（大小写不敏感）。
pub fn parse_cipher_suites(names: &[String]) -> Result<Vec<CipherSuite>, ConfigError> {
    names
        .iter()
        .map(|name| {
            CipherSuite::from_name(name)
                .ok_or_else(|| ConfigError::UnknownCipherSuite(name.clone()))
        })
        .collect()
}
