//! Certificate 消息内单张证书的摘要提取。

use core::fmt;
use std::net::IpAddr;

use x509_parser::prelude::*;

/// 取证与诊断关心的证书字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// 主体 DN（RFC 4514 文本形式）。
    pub subject: String,
    /// 签发者 DN。
    pub issuer: String,
    /// 主体备用名称，带 `DNS:`/`IP:`/`email:`/`URI:` 前缀。
    pub subject_alt_names: Vec<String>,
    /// 序列号，冒号分隔的十六进制。
    pub serial: String,
    /// 生效时间。
    pub not_before: String,
    /// 失效时间。
    pub not_after: String,
    /// 主体与签发者的原始 DER 编码是否一致。
    pub self_issued: bool,
}

impl fmt::Display for CertificateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject={}", self.subject)?;
        if !self.subject_alt_names.is_empty() {
            write!(f, " san=[{}]", self.subject_alt_names.join(", "))?;
        }
        Ok(())
    }
}

/// 解析 DER 证书并提取摘要；失败时返回解析器给出的原因文本。
pub fn summarize_certificate(der: &[u8]) -> Result<CertificateSummary, String> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|err| err.to_string())?;

    let subject_alt_names = cert
        .extensions()
        .iter()
        .filter_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => Some(san),
            _ => None,
        })
        .flat_map(|san| san.general_names.iter())
        .filter_map(render_general_name)
        .collect();

    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        subject_alt_names,
        serial: cert.raw_serial_as_string(),
        not_before: cert.validity().not_before.to_string(),
        not_after: cert.validity().not_after.to_string(),
        self_issued: cert.subject().as_raw() == cert.issuer().as_raw(),
    })
}

fn render_general_name(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(format!("DNS:{dns}")),
        GeneralName::RFC822Name(mail) => Some(format!("email:{mail}")),
        GeneralName::URI(uri) => Some(format!("URI:{uri}")),
        GeneralName::IPAddress(raw) => ip_from_raw(raw).map(|ip| format!("IP:{ip}")),
        _ => None,
    }
}

fn ip_from_raw(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}
