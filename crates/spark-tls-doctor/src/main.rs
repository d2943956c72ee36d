//! `tls-doctor`：诊断一个主机名下所有地址的 TLS 连接失败。
//!
//! # 设计动机（Why）
//! - 把 `spark-tls-probe` 的库能力包装成运维可直接使用的命令：解析主机名、逐地址握手、按根因输出诊断。
//!
//! # 工作方式（How）
//! 1. 安装 `tracing-subscriber`（`fmt` + `EnvFilter`，`RUST_LOG` 缺省为 `info`）；
//! 2. 读取可选的 TOML 配置，再用命令行参数覆盖，随后加载信任库与客户端身份；
//! 3. 通过 `tokio::net::lookup_host` 解析目标，执行 `check_all` 并打印 [`DiagnosisReport`]。
//!
//! # 使用契约（What）
//! - 退出码：全部成功为 0；任一地址失败（含无法解析）为 1；参数或配置问题为 2。
//!
//! [`DiagnosisReport`]: spark_tls_probe::DiagnosisReport

mod cli;

use std::{env, fs, io, net::SocketAddr, process, sync::Arc};

use anyhow::{Context, bail};
use spark_tls_probe::{
    Checker, ClientIdentity, MemoryTrustStore, ProbeConfig, ProbeSettings, Reporter,
};
use tokio::net::lookup_host;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command, USAGE, UsageError};

enum DoctorError {
    Usage(UsageError),
    Config(anyhow::Error),
    Resolve(String, io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let code = match run(env::args().skip(1)).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(DoctorError::Usage(error)) => {
            eprintln!("tls-doctor: {error}\n\n{USAGE}");
            2
        }
        Err(DoctorError::Config(error)) => {
            eprintln!("tls-doctor: configuration problem: {error:#}");
            2
        }
        Err(DoctorError::Resolve(host, error)) => {
            eprintln!("tls-doctor: cannot resolve {host}: {error}");
            1
        }
    };
    process::exit(code);
}

/// 返回是否全部成功。
async fn run(argv: impl IntoIterator<Item = String>) -> Result<bool, DoctorError> {
    let args = match cli::parse(argv).map_err(DoctorError::Usage)? {
        Command::Help => {
            println!("{USAGE}");
            return Ok(true);
        }
        Command::Run(args) => args,
    };

    let config = load_config(&args).map_err(DoctorError::Config)?;
    let checker = Checker::new(config).map_err(|error| DoctorError::Config(error.into()))?;

    let addresses = resolve(&args.host, args.port)
        .await
        .map_err(|error| DoctorError::Resolve(args.host.clone(), error))?;
    tracing::info!(
        host = %args.host,
        port = args.port,
        addresses = addresses.len(),
        "resolved target"
    );

    let outcomes = checker.check_all(&addresses, &args.host).await;
    let report = Reporter::new(checker.config()).analyze(&outcomes);
    print!("{report}");
    Ok(report.all_succeeded())
}

fn load_config(args: &Args) -> anyhow::Result<ProbeConfig> {
    let mut settings = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ProbeSettings::from_toml_str(&text).with_context(|| format!("in {}", path.display()))?
        }
        None => ProbeSettings::default(),
    };
    args.override_settings(&mut settings);

    let mut config = settings.apply(ProbeConfig::default())?;

    if let Some(path) = &settings.trust_pem {
        let pem = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let store = MemoryTrustStore::from_pem(path.display().to_string(), &pem)?;
        config = config.with_trust_store(Arc::new(store));
    }

    match (&settings.client_certificate, &settings.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let chain = fs::read(cert_path)
                .with_context(|| format!("reading {}", cert_path.display()))?;
            let key =
                fs::read(key_path).with_context(|| format!("reading {}", key_path.display()))?;
            config = config.with_identity(ClientIdentity::from_pem(&chain, &key)?);
        }
        (None, None) => {}
        _ => bail!("client certificate and client key must be configured together"),
    }

    Ok(config)
}

async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let mut addresses: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    // 同一地址可能经多条解析路径重复出现。
    let mut seen = std::collections::HashSet::new();
    addresses.retain(|address| seen.insert(*address));
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned",
        ));
    }
    Ok(addresses)
}
