//! 集成测试共享的 PKI 与对端。
//!
//! - [`Authority`]：rcgen 生成的 CA，可签发服务端证书；
//! - [`spawn_tls_server`]：进程内 tokio-rustls 服务端，握手后读到 EOF 为止；
//! - [`spawn_scripted_peer`]：读完客户端首条记录后回写固定字节的伪造对端。

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::TlsAcceptor;

/// 测试用证书颁发机构。
pub struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

/// 服务端证书链与私钥。
pub struct ServerIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Authority {
    pub fn new(name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new()).context("CA 参数非法")?;
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().context("生成 CA 密钥失败")?;
        let cert = params.self_signed(&key).context("CA 自签失败")?;
        Ok(Self { cert, key })
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// 签发带给定 SAN 的服务端证书；链中只含叶子。
    pub fn issue(&self, names: &[&str]) -> Result<ServerIdentity> {
        let mut params = CertificateParams::new(
            names.iter().map(|name| name.to_string()).collect::<Vec<_>>(),
        )
        .context("服务端证书参数非法")?;
        params.distinguished_name.push(DnType::CommonName, names[0]);
        let key = KeyPair::generate().context("生成服务端密钥失败")?;
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .context("签发服务端证书失败")?;
        let key = PrivateKeyDer::try_from(key.serialize_der())
            .map_err(|err| anyhow::anyhow!("私钥格式非法: {err}"))?;
        Ok(ServerIdentity {
            chain: vec![cert.der().clone()],
            key,
        })
    }
}

fn server_config(identity: ServerIdentity) -> Result<ServerConfig> {
    ServerConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .context("协议版本配置失败")?
        .with_no_client_auth()
        .with_single_cert(identity.chain, identity.key)
        .context("装载服务端证书失败")
}

/// 启动 TLS 服务端，返回监听地址。
pub async fn spawn_tls_server(identity: ServerIdentity) -> Result<SocketAddr> {
    let acceptor = TlsAcceptor::from(Arc::new(server_config(identity)?));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("监听 TLS 端口失败")?;
    let addr = listener.local_addr().context("读取监听地址失败")?;
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // 握手失败属于被测场景，服务端静默丢弃。
                if let Ok(mut tls) = acceptor.accept(tcp).await {
                    let mut sink = [0u8; 1024];
                    while matches!(tls.read(&mut sink).await, Ok(n) if n > 0) {}
                }
            });
        }
    });
    Ok(addr)
}

/// 读取一条完整记录（通常是 ClientHello）。
async fn read_record(tcp: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 5];
    tcp.read_exact(&mut header).await?;
    let len = usize::from(u16::from_be_bytes([header[3], header[4]]));
    let mut body = vec![0u8; len];
    tcp.read_exact(&mut body).await?;
    Ok(body)
}

/// 启动伪造对端：读完客户端首条记录后写出 `reply`；`linger` 为真时等到客户端关闭再断开。
pub async fn spawn_scripted_peer(reply: &'static [u8], linger: bool) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("监听伪造对端端口失败")?;
    let addr = listener.local_addr().context("读取监听地址失败")?;
    tokio::spawn(async move {
        while let Ok((mut tcp, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_record(&mut tcp).await.is_err() {
                    return;
                }
                if !reply.is_empty() && tcp.write_all(reply).await.is_err() {
                    return;
                }
                if linger {
                    let mut sink = [0u8; 256];
                    while matches!(tcp.read(&mut sink).await, Ok(n) if n > 0) {}
                }
            });
        }
    });
    Ok(addr)
}

/// 获取一个当前无人监听的本地端口。
pub async fn refused_address() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("临时监听失败")?;
    let addr = listener.local_addr().context("读取监听地址失败")?;
    drop(listener);
    Ok(addr)
}
