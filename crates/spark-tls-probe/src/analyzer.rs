//! 证书链分析：解释一条链为什么不被信任。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - `rustls` 的信任失败只有一个错误码（如 `UnknownIssuer`），排障人员真正需要的是“链缺了哪一环、
//!   哪一环签名对不上、缺的根在不在某个信任库里”。
//!
//! ## 逻辑（How）
//! - 逐张解析证书并计算 SHA-256 指纹，解析失败记为 [`ChainFinding::Unparseable`]；
//! - 叶子自签：[`ChainFinding::SelfSigned`]；
//! - 链尾非自签：先在配置的信任库、再在平台信任库中寻找公钥能验证链尾签名的条目
//!   （[`ChainFinding::MissingTrustAnchor`]）；
//! - 相邻两张证书逐一验签，所有失败链接汇总为 [`ChainFinding::BrokenSignatureLink`]；
//! - 链长大于一且链尾自签、但不在任何信任库中：[`ChainFinding::UntrustedRoot`]。
//!
//! ## 契约（What）
//! - 分析器只解释，不做信任判定；没有发现任何问题时 `findings` 为空。

use std::{fmt, sync::Arc};

use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use spark_tls_wire::{CertificateSummary, summarize_certificate};
use x509_parser::{prelude::*, x509::SubjectPublicKeyInfo};

use crate::{
    config::ProbeConfig,
    trust::{PlatformTrustStore, TrustStore, display_name},
};

/// 一条签名校验失败的链接：`chain[index]` 未能被 `chain[index + 1]` 的公钥验证。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    /// 被签名证书在链中的位置。
    pub index: usize,
    /// 被签名证书的主体。
    pub subject: String,
    /// 被签名证书声明的签发者。
    pub issuer: String,
    /// 验签错误。
    pub error: String,
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} not signed by [{}] (claimed issuer {}): {}",
            self.index,
            self.subject,
            self.index + 1,
            self.issuer,
            self.error
        )
    }
}

/// 信任库中能验证链尾签名的条目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    /// 信任库名称。
    pub store: String,
    /// 条目别名。
    pub alias: String,
}

/// 单项发现。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFinding {
    /// 叶子证书自签。
    SelfSigned {
        /// 叶子主体。
        subject: String,
    },
    /// 链尾的签发者没有随链发送。
    MissingTrustAnchor {
        /// 链尾声明的签发者。
        issuer: String,
        /// 在某个信任库中找到的签发者；`None` 表示所有信任库都没有。
        found: Option<AnchorMatch>,
    },
    /// 链内签名校验失败。
    BrokenSignatureLink(Vec<LinkFailure>),
    /// 链尾自签但不在任何信任库中。
    UntrustedRoot {
        /// 根证书主体。
        subject: String,
    },
    /// 证书无法解析。
    Unparseable {
        /// 链中位置。
        index: usize,
        /// 解析错误。
        reason: String,
    },
}

impl fmt::Display for ChainFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFinding::SelfSigned { subject } => {
                write!(f, "leaf certificate {subject} is self-signed")
            }
            ChainFinding::MissingTrustAnchor {
                issuer,
                found: Some(anchor),
            } => write!(
                f,
                "chain does not include its issuer {issuer}; found as '{}' in trust store '{}'",
                anchor.alias, anchor.store
            ),
            ChainFinding::MissingTrustAnchor {
                issuer,
                found: None,
            } => write!(
                f,
                "issuer {issuer} is neither sent by the peer nor present in any trust store"
            ),
            ChainFinding::BrokenSignatureLink(links) => {
                f.write_str("broken signature links:")?;
                for link in links {
                    write!(f, "\n    {link}")?;
                }
                Ok(())
            }
            ChainFinding::UntrustedRoot { subject } => {
                write!(f, "root {subject} is self-signed but not in any trust store")
            }
            ChainFinding::Unparseable { index, reason } => {
                write!(f, "certificate [{index}] could not be parsed: {reason}")
            }
        }
    }
}

/// 链中单张证书的摘要。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    /// DER 的 SHA-256 指纹（小写十六进制）。
    pub sha256: String,
    /// 字段摘要；无法解析时为 `None`。
    pub summary: Option<CertificateSummary>,
}

/// 分析结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainAnalysis {
    /// 链中各证书，叶子在前。
    pub certificates: Vec<ChainEntry>,
    /// 发现项；为空表示无具体诊断。
    pub findings: Vec<ChainFinding>,
    /// 校验器给出的信任失败原因。
    pub failure: Option<String>,
}

impl fmt::Display for ChainAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(failure) = &self.failure {
            writeln!(f, "verifier: {failure}")?;
        }
        writeln!(f, "peer chain ({} certificates):", self.certificates.len())?;
        for (index, entry) in self.certificates.iter().enumerate() {
            match &entry.summary {
                Some(summary) => writeln!(
                    f,
                    "  [{index}] subject={} issuer={} not_after={} sha256={}",
                    summary.subject, summary.issuer, summary.not_after, entry.sha256
                )?,
                None => writeln!(f, "  [{index}] <unparseable> sha256={}", entry.sha256)?,
            }
        }
        if self.findings.is_empty() {
            writeln!(f, "no specific chain problem identified")?;
        }
        for finding in &self.findings {
            writeln!(f, "- {finding}")?;
        }
        Ok(())
    }
}

/// 证书链分析器。
#[derive(Debug, Clone)]
pub struct ChainAnalyzer {
    stores: Vec<Arc<dyn TrustStore>>,
}

impl ChainAnalyzer {
    /// 按顺序查询给定信任库。
    pub fn with_stores(stores: Vec<Arc<dyn TrustStore>>) -> Self {
        Self { stores }
    }

    /// 先查配置的信任库，再查平台信任库。
    pub fn from_config(config: &ProbeConfig) -> Self {
        let mut stores: Vec<Arc<dyn TrustStore>> = Vec::new();
        if let Some(store) = config.trust_store() {
            stores.push(store.clone());
        }
        stores.push(Arc::new(PlatformTrustStore::new()));
        Self { stores }
    }

    /// 参与查询的信任库。
    pub fn stores(&self) -> &[Arc<dyn TrustStore>] {
        &self.stores
    }

    /// 分析对端证书链（叶子在前）。
    pub fn analyze(
        &self,
        chain: &[CertificateDer<'_>],
        failure: Option<&rustls::Error>,
    ) -> ChainAnalysis {
        let mut analysis = ChainAnalysis {
            certificates: chain
                .iter()
                .map(|der| ChainEntry {
                    sha256: hex::encode(Sha256::digest(der.as_ref())),
                    summary: summarize_certificate(der.as_ref()).ok(),
                })
                .collect(),
            findings: Vec::new(),
            failure: failure.map(ToString::to_string),
        };

        let mut parsed = Vec::with_capacity(chain.len());
        for (index, der) in chain.iter().enumerate() {
            match X509Certificate::from_der(der.as_ref()) {
                Ok((_, cert)) => parsed.push(Some(cert)),
                Err(err) => {
                    analysis.findings.push(ChainFinding::Unparseable {
                        index,
                        reason: err.to_string(),
                    });
                    parsed.push(None);
                }
            }
        }

        if let Some(Some(leaf)) = parsed.first() {
            if is_self_issued(leaf) {
                analysis.findings.push(ChainFinding::SelfSigned {
                    subject: display_name(leaf.subject()),
                });
            }
        }

        if let Some(Some(tail)) = parsed.last() {
            if !is_self_issued(tail) {
                analysis.findings.push(ChainFinding::MissingTrustAnchor {
                    issuer: display_name(tail.issuer()),
                    found: self.find_issuer(tail),
                });
            } else if chain.len() > 1 && !self.contains(tail) {
                analysis.findings.push(ChainFinding::UntrustedRoot {
                    subject: display_name(tail.subject()),
                });
            }
        }

        let broken: Vec<LinkFailure> = parsed
            .windows(2)
            .enumerate()
            .filter_map(|(index, pair)| match pair {
                [Some(child), Some(parent)] => child
                    .verify_signature(Some(parent.public_key()))
                    .err()
                    .map(|err| LinkFailure {
                        index,
                        subject: display_name(child.subject()),
                        issuer: display_name(child.issuer()),
                        error: err.to_string(),
                    }),
                _ => None,
            })
            .collect();
        if !broken.is_empty() {
            analysis.findings.push(ChainFinding::BrokenSignatureLink(broken));
        }

        tracing::debug!(
            chain_len = chain.len(),
            findings = analysis.findings.len(),
            "certificate chain analysed"
        );
        analysis
    }

    fn find_issuer(&self, tail: &X509Certificate<'_>) -> Option<AnchorMatch> {
        self.stores.iter().find_map(|store| {
            store.entries().iter().find_map(|entry| {
                let (_, spki) = SubjectPublicKeyInfo::from_der(entry.spki()).ok()?;
                tail.verify_signature(Some(&spki)).ok()?;
                Some(AnchorMatch {
                    store: store.name().to_owned(),
                    alias: entry.alias().to_owned(),
                })
            })
        })
    }

    fn contains(&self, cert: &X509Certificate<'_>) -> bool {
        let subject = cert.subject().as_raw();
        let spki = cert.public_key().raw;
        self.stores.iter().any(|store| store.contains(subject, spki))
    }
}

fn is_self_issued(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}
