//! 信任材料与客户端身份。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 诊断核心只需要“成员判定 + 可枚举的别名/主体”，不关心信任材料来自 PEM 文件、内存还是平台默认集合；
//!   [`TrustStore`] 把这一最小能力抽象出来，分析器与校验器都只依赖该 trait。
//! - 平台默认信任集合取自 `webpki-roots`，分析器在配置的信任库之外再检索它，用于回答
//!   “缺失的签发者其实是某个公共根”这类问题。
//!
//! ## 契约（What）
//! - [`TrustEntry::subject`] 与 [`TrustEntry::spki`] 均为完整 DER（含外层 SEQUENCE 头），
//!   可与 `x509-parser` 给出的原始编码直接比较；
//! - [`TrustStore::root_store`] 生成供 `rustls` 校验器使用的根集合；
//! - 构造失败返回 [`TrustError`]，调用方据此给出清晰的配置错误。
//!
//! ## 风险与权衡（Trade-offs）
//! - `webpki-roots` 的锚点只保存主体与公钥的内容部分，这里重新包上 SEQUENCE 头，
//!   以便与证书中的原始编码对齐。

use std::{fmt, sync::Arc};

use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, TrustAnchor, pem::PemObject};
use thiserror::Error;
use x509_parser::prelude::*;

/// 信任材料加载错误。
#[derive(Debug, Error)]
pub enum TrustError {
    /// PEM 文本无法解析。
    #[error("invalid PEM data: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),
    /// 某张证书不是合法的 DER。
    #[error("certificate #{index} in {store} is not valid DER: {reason}")]
    Certificate {
        /// 信任库名称。
        store: String,
        /// 证书位置。
        index: usize,
        /// 解析器给出的原因。
        reason: String,
    },
    /// 证书无法作为信任锚。
    #[error("certificate {alias} cannot be used as a trust anchor: {source}")]
    Anchor {
        /// 证书别名。
        alias: String,
        /// rustls 给出的原因。
        source: rustls::Error,
    },
    /// 信任库不含任何证书。
    #[error("trust store {0} contains no certificates")]
    Empty(String),
    /// 客户端身份缺少证书或私钥。
    #[error("client identity is incomplete: {0}")]
    Identity(&'static str),
}

/// 信任库中的一个条目。
#[derive(Debug, Clone)]
pub struct TrustEntry {
    alias: String,
    subject: Vec<u8>,
    spki: Vec<u8>,
    anchor: TrustAnchor<'static>,
}

impl TrustEntry {
    /// 人类可读的别名（通常为主体 CN）。
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// 主体名称的完整 DER 编码。
    pub fn subject(&self) -> &[u8] {
        &self.subject
    }

    /// SubjectPublicKeyInfo 的完整 DER 编码。
    pub fn spki(&self) -> &[u8] {
        &self.spki
    }

    /// 供 `rustls` 使用的信任锚。
    pub fn anchor(&self) -> &TrustAnchor<'static> {
        &self.anchor
    }
}

/// 信任库抽象：成员判定与可枚举的条目。
pub trait TrustStore: Send + Sync + fmt::Debug {
    /// 信任库名称，用于报告。
    fn name(&self) -> &str;

    /// 全部条目。
    fn entries(&self) -> &[TrustEntry];

    /// 条目数量。
    fn len(&self) -> usize {
        self.entries().len()
    }

    /// 是否为空。
    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// 是否包含主体与公钥都相同的条目。
    fn contains(&self, subject: &[u8], spki: &[u8]) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.subject == subject && entry.spki == spki)
    }

    /// 生成 `rustls` 根集合。
    fn root_store(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.extend(self.entries().iter().map(|entry| entry.anchor.clone()));
        roots
    }
}

/// 由调用方提供的证书构成的信任库。
#[derive(Debug, Clone)]
pub struct MemoryTrustStore {
    name: String,
    entries: Vec<TrustEntry>,
}

impl MemoryTrustStore {
    /// 由 DER 证书构造。
    pub fn from_der(
        name: impl Into<String>,
        certificates: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, TrustError> {
        let name = name.into();
        let mut entries = Vec::new();
        for (index, der) in certificates.into_iter().enumerate() {
            entries.push(entry_from_certificate(&name, index, der)?);
        }
        if entries.is_empty() {
            return Err(TrustError::Empty(name));
        }
        Ok(Self { name, entries })
    }

    /// 由 PEM 文本构造，忽略非证书段。
    pub fn from_pem(name: impl Into<String>, pem: &[u8]) -> Result<Self, TrustError> {
        let certificates = CertificateDer::pem_slice_iter(pem).collect::<Result<Vec<_>, _>>()?;
        Self::from_der(name, certificates)
    }
}

impl TrustStore for MemoryTrustStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn entries(&self) -> &[TrustEntry] {
        &self.entries
    }
}

fn entry_from_certificate(
    store: &str,
    index: usize,
    der: CertificateDer<'static>,
) -> Result<TrustEntry, TrustError> {
    let (_, cert) = X509Certificate::from_der(&der).map_err(|err| TrustError::Certificate {
        store: store.to_owned(),
        index,
        reason: err.to_string(),
    })?;
    let alias = display_name(cert.subject());
    let subject = cert.subject().as_raw().to_vec();
    let spki = cert.public_key().raw.to_vec();

    let mut scratch = RootCertStore::empty();
    scratch
        .add(der.clone())
        .map_err(|source| TrustError::Anchor {
            alias: alias.clone(),
            source,
        })?;
    let anchor = scratch.roots.pop().ok_or(TrustError::Empty(alias.clone()))?;

    Ok(TrustEntry {
        alias,
        subject,
        spki,
        anchor,
    })
}

/// 平台默认信任集合（Mozilla 根，经 `webpki-roots` 分发）。
#[derive(Debug, Clone)]
pub struct PlatformTrustStore {
    entries: Arc<[TrustEntry]>,
}

impl PlatformTrustStore {
    /// 加载内置根集合。
    pub fn new() -> Self {
        let entries = webpki_roots::TLS_SERVER_ROOTS
            .iter()
            .map(|anchor| {
                let subject = wrap_sequence(anchor.subject.as_ref());
                let spki = wrap_sequence(anchor.subject_public_key_info.as_ref());
                let alias = X509Name::from_der(&subject)
                    .map(|(_, name)| display_name(&name))
                    .unwrap_or_else(|_| hex::encode(&subject));
                TrustEntry {
                    alias,
                    subject,
                    spki,
                    anchor: anchor.clone(),
                }
            })
            .collect();
        Self { entries }
    }
}

impl Default for PlatformTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore for PlatformTrustStore {
    fn name(&self) -> &str {
        "platform"
    }

    fn entries(&self) -> &[TrustEntry] {
        &self.entries
    }
}

/// 首个 CN，缺失时退回完整 DN。
pub(crate) fn display_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| name.to_string())
}

/// 为 DER 内容补上 SEQUENCE 标签与长度。
fn wrap_sequence(contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len() + 6);
    out.push(0x30);
    let len = contents.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|byte| **byte == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(contents);
    out
}

/// 客户端证书认证所需的证书链与私钥。
pub struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientIdentity {
    /// 由 DER 证书链与私钥构造。
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    /// 由 PEM 文本构造：证书链取全部证书段，私钥取首个私钥段。
    pub fn from_pem(certificates: &[u8], key: &[u8]) -> Result<Self, TrustError> {
        let chain = CertificateDer::pem_slice_iter(certificates).collect::<Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(TrustError::Identity("no certificate in PEM input"));
        }
        let key = PrivateKeyDer::from_pem_slice(key)?;
        Ok(Self { chain, key })
    }

    /// 证书链。
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// 私钥。
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_from_pem_exposes_subject_and_key() {
        let certified = rcgen::generate_simple_self_signed(vec!["ca.test".to_string()]).unwrap();
        let pem = certified.cert.pem();
        let store = MemoryTrustStore::from_pem("configured", pem.as_bytes()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.name(), "configured");

        let (_, parsed) = X509Certificate::from_der(certified.cert.der()).unwrap();
        assert!(store.contains(parsed.subject().as_raw(), parsed.public_key().raw));
        assert_eq!(store.root_store().len(), 1);
    }

    #[test]
    fn empty_pem_is_rejected() {
        assert!(matches!(
            MemoryTrustStore::from_pem("configured", b"no certificates here"),
            Err(TrustError::Empty(_))
        ));
    }

    #[test]
    fn platform_entries_align_with_certificate_encoding() {
        let platform = PlatformTrustStore::new();
        assert!(platform.len() > 50);
        for entry in platform.entries().iter().take(5) {
            assert_eq!(entry.subject()[0], 0x30);
            assert!(X509Name::from_der(entry.subject()).is_ok());
            assert!(SubjectPublicKeyInfo::from_der(entry.spki()).is_ok());
        }
    }

    #[test]
    fn long_contents_use_long_form_length() {
        let wrapped = wrap_sequence(&[0u8; 300]);
        assert_eq!(&wrapped[..4], &[0x30, 0x82, 0x01, 0x2c]);
        assert_eq!(wrapped.len(), 304);
    }

    #[test]
    fn identity_from_pem_requires_a_certificate() {
        let certified =
            rcgen::generate_simple_self_signed(vec!["client.test".to_string()]).unwrap();
        let key_pem = certified.key_pair.serialize_pem();
        let identity =
            ClientIdentity::from_pem(certified.cert.pem().as_bytes(), key_pem.as_bytes()).unwrap();
        assert_eq!(identity.chain().len(), 1);
        assert!(format!("{identity:?}").contains("redacted"));
        assert!(ClientIdentity::from_pem(b"", key_pem.as_bytes()).is_err());
    }
}
