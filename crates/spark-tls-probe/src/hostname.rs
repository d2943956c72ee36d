//! 可选的主机名校验阶段。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 诊断工具首先要回答“链路为何不通”，主机名不匹配只是其中一种结论；因此校验独立成阶段，
//!   默认关闭（[`DisabledHostnameVerifier`]），由调用方显式开启。
//! - [`HostnameVerifier`] 是扩展点：调用方可以换成自己的策略（例如允许内部别名）。
//!
//! ## 契约（What）
//! - [`SubjectAltNameVerifier`] 按 RFC 6125 匹配：DNS 名称大小写不敏感、忽略末尾的点；
//!   通配符只能是最左侧的完整标签且只匹配一个标签，`*.com` 这类过宽模式不匹配任何名称；
//!   期望值为 IP 字面量时只与 IP SAN 比较。
//! - 不回退到 CN：证书没有 SAN 时视为不匹配。

use std::{fmt, net::IpAddr};

use rustls_pki_types::CertificateDer;
use x509_parser::prelude::*;

/// 主机名校验结论。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostnameCheck {
    /// 未执行校验。
    Skipped,
    /// 匹配成功。
    Passed,
    /// 不匹配。
    Failed {
        /// 期望的主机名。
        expected: String,
        /// 证书给出的名称（带 `DNS:`/`IP:` 前缀）。
        presented: Vec<String>,
    },
}

impl fmt::Display for HostnameCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostnameCheck::Skipped => f.write_str("skipped"),
            HostnameCheck::Passed => f.write_str("passed"),
            HostnameCheck::Failed {
                expected,
                presented,
            } => write!(
                f,
                "{expected} does not match [{}]",
                presented.join(", ")
            ),
        }
    }
}

/// 主机名校验扩展点。
pub trait HostnameVerifier: Send + Sync + fmt::Debug {
    /// 校验叶子证书是否覆盖 `hostname`。
    fn verify(&self, hostname: &str, leaf: &CertificateDer<'_>) -> HostnameCheck;
}

/// 不执行任何校验。
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledHostnameVerifier;

impl HostnameVerifier for DisabledHostnameVerifier {
    fn verify(&self, _hostname: &str, _leaf: &CertificateDer<'_>) -> HostnameCheck {
        HostnameCheck::Skipped
    }
}

/// 基于 SubjectAltName 的 RFC 6125 校验。
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectAltNameVerifier;

enum Presented {
    Dns(String),
    Ip(IpAddr),
}

impl Presented {
    fn render(&self) -> String {
        match self {
            Presented::Dns(name) => format!("DNS:{name}"),
            Presented::Ip(ip) => format!("IP:{ip}"),
        }
    }
}

impl HostnameVerifier for SubjectAltNameVerifier {
    fn verify(&self, hostname: &str, leaf: &CertificateDer<'_>) -> HostnameCheck {
        let presented = presented_names(leaf);
        let matched = match hostname.parse::<IpAddr>() {
            Ok(ip) => presented
                .iter()
                .any(|name| matches!(name, Presented::Ip(candidate) if *candidate == ip)),
            Err(_) => presented.iter().any(|name| match name {
                Presented::Dns(pattern) => dns_matches(pattern, hostname),
                Presented::Ip(_) => false,
            }),
        };
        if matched {
            HostnameCheck::Passed
        } else {
            HostnameCheck::Failed {
                expected: hostname.to_owned(),
                presented: presented.iter().map(Presented::render).collect(),
            }
        }
    }
}

fn presented_names(leaf: &CertificateDer<'_>) -> Vec<Presented> {
    let Ok((_, cert)) = X509Certificate::from_der(leaf.as_ref()) else {
        return Vec::new();
    };
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(Presented::Dns((*dns).to_owned())),
            GeneralName::IPAddress(raw) => ip_from_raw(raw).map(Presented::Ip),
            _ => None,
        })
        .collect()
}

fn ip_from_raw(raw: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(raw) {
        return Some(IpAddr::from(octets));
    }
    <[u8; 16]>::try_from(raw).ok().map(IpAddr::from)
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// RFC 6125 §6.4 的 DNS 名称匹配。
fn dns_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = normalize(pattern);
    let hostname = normalize(hostname);
    if hostname.is_empty() || pattern.is_empty() {
        return false;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return !pattern.contains('*') && pattern == hostname;
    };
    if suffix.contains('*') || !suffix.contains('.') {
        return false;
    }
    match hostname.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == suffix,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(names: &[&str]) -> CertificateDer<'static> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let certified = rcgen::generate_simple_self_signed(names).unwrap();
        certified.cert.der().clone()
    }

    #[test]
    fn wildcard_rules() {
        assert!(dns_matches("*.example.com", "www.example.com"));
        assert!(dns_matches("*.Example.COM.", "API.example.com"));
        assert!(!dns_matches("*.example.com", "example.com"));
        assert!(!dns_matches("*.example.com", "a.b.example.com"));
        assert!(!dns_matches("*.com", "example.com"));
        assert!(!dns_matches("w*.example.com", "www.example.com"));
        assert!(dns_matches("exact.test", "EXACT.test."));
    }

    #[test]
    fn san_verifier_matches_dns_and_ip() {
        let cert = leaf(&["*.probe.test", "10.0.0.7"]);
        let verifier = SubjectAltNameVerifier;
        assert_eq!(verifier.verify("node.probe.test", &cert), HostnameCheck::Passed);
        assert_eq!(verifier.verify("10.0.0.7", &cert), HostnameCheck::Passed);

        let HostnameCheck::Failed { expected, presented } = verifier.verify("other.test", &cert)
        else {
            panic!("expected mismatch");
        };
        assert_eq!(expected, "other.test");
        assert!(presented.contains(&"DNS:*.probe.test".to_string()));
        assert!(presented.contains(&"IP:10.0.0.7".to_string()));
    }

    #[test]
    fn disabled_verifier_skips() {
        let cert = leaf(&["a.test"]);
        assert_eq!(
            DisabledHostnameVerifier.verify("b.test", &cert),
            HostnameCheck::Skipped
        );
    }
}
