//! 命令行参数解析。
//!
//! 参数面很小，沿用手写解析：逐个消费 `std::env::args`，未知选项与缺失的取值都以 [`UsageError`] 返回，
//! 由 `main` 统一打印用法并以退出码 2 结束。

use std::path::PathBuf;

use spark_tls_probe::ProbeSettings;
use thiserror::Error;

pub(crate) const USAGE: &str = "\
usage: tls-doctor <host[:port]> [options]

options:
  --config <file>        TOML settings file
  --trust <file>         PEM trust store (replaces the platform roots)
  --client-cert <file>   PEM client certificate chain
  --client-key <file>    PEM client private key
  --protocol <name>      offered protocol, repeatable (TLSv1.2, TLSv1.3)
  --cipher <name>        offered IANA cipher suite, repeatable
  --alpn <name>          offered ALPN protocol, repeatable
  --timeout-ms <n>       connect and read/write timeout
  --concurrency <n>      endpoints checked at the same time
  --observe              mirror handshake bytes for forensic replay
  --no-observe           disable the handshake mirror
  --verify-hostname      fail endpoints whose certificate does not match the host
  -h, --help             print this help";

const DEFAULT_PORT: u16 = 443;

/// 参数错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum UsageError {
    #[error("missing target host")]
    MissingTarget,
    #[error("unexpected argument {0:?}")]
    Unexpected(String),
    #[error("option {0} requires a value")]
    MissingValue(&'static str),
    #[error("option {option} expects a number, got {value:?}")]
    NotANumber { option: &'static str, value: String },
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

/// 解析结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    Run(Args),
}

/// 一次运行的参数。
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Args {
    pub host: String,
    pub port: u16,
    pub config: Option<PathBuf>,
    trust: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    protocols: Vec<String>,
    ciphers: Vec<String>,
    alpn: Vec<String>,
    timeout_ms: Option<u64>,
    concurrency: Option<usize>,
    observe: Option<bool>,
    verify_hostname: bool,
}

impl Args {
    /// 命令行取值覆盖配置文件中的同名项。
    pub fn override_settings(&self, settings: &mut ProbeSettings) {
        if self.trust.is_some() {
            settings.trust_pem = self.trust.clone();
        }
        if self.client_cert.is_some() {
            settings.client_certificate = self.client_cert.clone();
        }
        if self.client_key.is_some() {
            settings.client_key = self.client_key.clone();
        }
        if !self.protocols.is_empty() {
            settings.protocols = self.protocols.clone();
        }
        if !self.ciphers.is_empty() {
            settings.cipher_suites = self.ciphers.clone();
        }
        if !self.alpn.is_empty() {
            settings.alpn = self.alpn.clone();
        }
        if let Some(ms) = self.timeout_ms {
            settings.connect_timeout_ms = Some(ms);
            settings.read_timeout_ms = Some(ms);
        }
        if self.concurrency.is_some() {
            settings.concurrency = self.concurrency;
        }
        if self.observe.is_some() {
            settings.observe = self.observe;
        }
        if self.verify_hostname {
            settings.verify_hostname = Some(true);
        }
    }
}

fn value(
    args: &mut impl Iterator<Item = String>,
    option: &'static str,
) -> Result<String, UsageError> {
    args.next().ok_or(UsageError::MissingValue(option))
}

fn number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    option: &'static str,
) -> Result<T, UsageError> {
    let raw = value(args, option)?;
    raw.parse()
        .map_err(|_| UsageError::NotANumber { option, value: raw })
}

/// 解析参数（不含程序名）。
pub(crate) fn parse(args: impl IntoIterator<Item = String>) -> Result<Command, UsageError> {
    let mut args = args.into_iter();
    let mut parsed = Args::default();
    let mut target = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--config" => parsed.config = Some(value(&mut args, "--config")?.into()),
            "--trust" => parsed.trust = Some(value(&mut args, "--trust")?.into()),
            "--client-cert" => parsed.client_cert = Some(value(&mut args, "--client-cert")?.into()),
            "--client-key" => parsed.client_key = Some(value(&mut args, "--client-key")?.into()),
            "--protocol" => parsed.protocols.push(value(&mut args, "--protocol")?),
            "--cipher" => parsed.ciphers.push(value(&mut args, "--cipher")?),
            "--alpn" => parsed.alpn.push(value(&mut args, "--alpn")?),
            "--timeout-ms" => parsed.timeout_ms = Some(number(&mut args, "--timeout-ms")?),
            "--concurrency" => parsed.concurrency = Some(number(&mut args, "--concurrency")?),
            "--observe" => parsed.observe = Some(true),
            "--no-observe" => parsed.observe = Some(false),
            "--verify-hostname" => parsed.verify_hostname = true,
            other if other.starts_with('-') || target.is_some() => {
                return Err(UsageError::Unexpected(arg));
            }
            _ => target = Some(arg),
        }
    }

    let target = target.ok_or(UsageError::MissingTarget)?;
    let (host, port) = split_target(&target)?;
    parsed.host = host;
    parsed.port = port;
    Ok(Command::Run(parsed))
}

/// 拆分 `host[:port]`；IPv6 字面量需要方括号才能携带端口。
fn split_target(target: &str) -> Result<(String, u16), UsageError> {
    let invalid = || UsageError::InvalidPort(target.to_owned());

    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid()),
        };
        return Ok((host.to_owned(), port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_owned(), port.parse().map_err(|_| invalid())?))
        }
        _ => Ok((target.to_owned(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn targets_with_and_without_ports() {
        assert_eq!(split_target("example.com"), Ok(("example.com".into(), 443)));
        assert_eq!(split_target("example.com:8443"), Ok(("example.com".into(), 8443)));
        assert_eq!(split_target("[::1]:9443"), Ok(("::1".into(), 9443)));
        assert_eq!(split_target("::1"), Ok(("::1".into(), 443)));
        assert!(split_target("example.com:https").is_err());
    }

    #[test]
    fn repeated_options_accumulate_and_override_settings() {
        let Ok(Command::Run(args)) = parse(argv(&[
            "--protocol",
            "TLSv1.2",
            "--protocol",
            "TLSv1.3",
            "--timeout-ms",
            "250",
            "--no-observe",
            "example.com:8443",
            "--verify-hostname",
        ])) else {
            panic!("expected run command");
        };
        assert_eq!(args.host, "example.com");
        assert_eq!(args.port, 8443);

        let mut settings = ProbeSettings {
            protocols: vec!["TLSv1.3".into()],
            concurrency: Some(4),
            ..ProbeSettings::default()
        };
        args.override_settings(&mut settings);
        assert_eq!(settings.protocols, vec!["TLSv1.2", "TLSv1.3"]);
        assert_eq!(settings.connect_timeout_ms, Some(250));
        assert_eq!(settings.read_timeout_ms, Some(250));
        assert_eq!(settings.observe, Some(false));
        assert_eq!(settings.verify_hostname, Some(true));
        assert_eq!(settings.concurrency, Some(4));
    }

    #[test]
    fn usage_errors() {
        assert_eq!(parse(argv(&[])), Err(UsageError::MissingTarget));
        assert_eq!(
            parse(argv(&["--cipher"])),
            Err(UsageError::MissingValue("--cipher"))
        );
        assert_eq!(
            parse(argv(&["a.test", "b.test"])),
            Err(UsageError::Unexpected("b.test".into()))
        );
        assert!(matches!(
            parse(argv(&["--concurrency", "many", "a.test"])),
            Err(UsageError::NotANumber { option: "--concurrency", .. })
        ));
        assert_eq!(parse(argv(&["a.test", "--help"])), Ok(Command::Help));
    }
}
