#![warn(missing_docs)]

//! # spark-tls-probe
//!
//! ## 教案目的（Why）
//! - **定位**：回答“为什么这个 TLS 连接失败了”。对一组已解析的地址逐一执行 TCP 连接与 TLS 握手，
//!   精确记录失败发生在哪个阶段，并把失败按根因归组、给出可执行的排查建议。
//! - **架构角色**：
//!   - [`Checker`] 驱动每个地址的“连接 → 握手 → 信任捕获 → 主机名校验”流水线，产出不可变的 [`Outcome`]；
//!   - [`ObservedStream`] 在握手期间镜像原始字节，失败时交给 `spark-tls-wire` 回放；
//!   - [`ChainAnalyzer`] 解释证书链为什么不被信任；
//!   - [`Reporter`] 依据 [`blame`] 解析出的根因归组，并按分派表生成 [`DiagnosisReport`]。
//! - **设计策略**：TLS 状态机交给 `rustls`，本 crate 只拥有显式的握手循环（[`drive_handshake`]）与
//!   证书校验的旁路捕获（[`CapturingVerifier`]），不修改任何协议行为。
//!
//! ## 交互契约（What）
//! - 配置通过显式的 [`ProbeConfig`] 值传入，每个 [`Checker`] 独立持有，不存在全局可变状态；
//!   `rustls` 的加密后端同样显式传入，从不安装为进程级默认值；
//! - [`Checker::check_all`] 对每个地址恰好产出一个 [`Outcome`]，顺序与输入一致，永不返回错误；
//! - [`Reporter::analyze`] 是纯函数，不执行 I/O。
//!
//! ## 实现策略（How）
//! - 连接与每次套接字读写都受超时约束，超时是唯一的取消手段；
//! - 错误以 [`ProbeError`] 承载稳定错误码、失败阶段与底层原因，[`blame`] 沿 `source()` 链
//!   （并穿透 `io::Error` 包装）找到最内层根因；
//! - 结构化日志统一经 `tracing` 输出：阶段推进为 `debug`，失败为 `warn`，观测器缺陷为 `error`，
//!   取证回放为 `info`。
//!
//! ## 风险提示（Trade-offs）
//! - TLS 1.3 在 ServerHello 之后加密握手消息，观测器只能还原明文阶段；
//! - 主机名校验默认关闭，与“诊断链路而非执行策略”的定位一致，需要时通过
//!   [`ProbeConfig::with_verify_hostname`] 开启。

mod analyzer;
mod blame;
mod checker;
mod classifier;
mod config;
mod engine;
mod error;
mod hostname;
mod observer;
mod outcome;
mod trust;
mod verifier;

pub use crate::{
    analyzer::{AnchorMatch, ChainAnalysis, ChainAnalyzer, ChainEntry, ChainFinding, LinkFailure},
    blame::{Blame, RootCause, blame, root_cause_of},
    checker::Checker,
    classifier::{Diagnosis, DiagnosisReport, FailureGroup, Reporter},
    config::{ConfigError, ProbeConfig, ProbeSettings, parse_cipher_suites, parse_protocols},
    engine::{HandshakeEngine, HandshakeStatus, drive_handshake},
    error::{FailureStage, ProbeError},
    hostname::{
        DisabledHostnameVerifier, HostnameCheck, HostnameVerifier, SubjectAltNameVerifier,
    },
    observer::{
        Direction, ForensicEntry, ForensicEvent, ForensicReport, Journal, MirrorOverflow,
        ObservedStream, Transaction,
    },
    outcome::{Endpoint, Outcome, PeerChain, SessionInfo},
    trust::{
        ClientIdentity, MemoryTrustStore, PlatformTrustStore, TrustEntry, TrustError, TrustStore,
    },
    verifier::{AuthType, CapturingVerifier, VerificationCallback, VerificationCapture, Verdict},
};

/// 每个方向镜像缓冲的默认容量。
pub const DEFAULT_MIRROR_CAPACITY: usize = 16 * 1024;
