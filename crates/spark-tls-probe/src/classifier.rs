//! 失败归类与诊断报告。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 几十个地址的失败往往只有一两个根因；按根因归组后，每组只需读一次诊断。
//!
//! ## 逻辑（How）
//! - 成功与失败分开；失败的 [`Outcome`] 经 [`blame`] 解析根因，按 [`RootCause`] 的全序归入
//!   `BTreeMap`，组内保持输入顺序；
//! - 每组以首个成员为代表：标题为“根因 + 消息首行”，其后列出全部地址与剩余原因行，最后按分派表生成
//!   [`Diagnosis`]。
//!
//! ## 契约（What）
//! - [`Reporter::analyze`] 是已计算结果的纯函数，不执行 I/O；同样的输入总是得到同样的报告。

use std::{collections::BTreeMap, fmt, net::SocketAddr, time::Duration};

use spark_tls_wire::{Alert, AlertDescription, AlertLevel, CipherSuite, ProtocolVersion};

use crate::{
    analyzer::{ChainAnalysis, ChainAnalyzer},
    blame::{Blame, RootCause, blame, received_alert},
    config::ProbeConfig,
    observer::Direction,
    outcome::{Endpoint, Outcome, SessionInfo},
};

/// 一组失败的诊断。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    /// 证书路径校验失败。
    CertificatePath {
        /// 代表成员的链分析；对端未发送证书时为 `None`。
        analysis: Option<ChainAnalysis>,
        /// 参与查询的信任库及其条目数。
        trust_stores: Vec<(String, usize)>,
    },
    /// 握手中途流结束：多半是协议版本不被接受或对端不是 TLS 服务。
    UnexpectedEof {
        /// 本端提供的协议版本。
        protocols: Vec<ProtocolVersion>,
    },
    /// 对端明确拒绝握手。
    HandshakeRejected {
        /// 本端提供的协议版本。
        protocols: Vec<ProtocolVersion>,
        /// 本端限定的套件；为空表示使用加密后端的默认集合。
        cipher_suites: Vec<CipherSuite>,
        /// 对端发来的致命告警：优先取自取证回放，未开启观测时取自错误链。
        peer_alerts: Vec<String>,
    },
    /// 无专门诊断。
    Generic,
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnosis::CertificatePath {
                analysis,
                trust_stores,
            } => {
                match analysis {
                    Some(analysis) => write!(f, "{analysis}")?,
                    None => writeln!(f, "peer sent no certificate chain")?,
                }
                for (name, len) in trust_stores {
                    writeln!(f, "trust store '{name}': {len} entries")?;
                }
                Ok(())
            }
            Diagnosis::UnexpectedEof { protocols } => {
                writeln!(
                    f,
                    "the peer closed the connection mid-handshake; it probably does not accept \
                     the offered protocol versions or is not a TLS endpoint"
                )?;
                writeln!(f, "offered protocols: {}", join(protocols))
            }
            Diagnosis::HandshakeRejected {
                protocols,
                cipher_suites,
                peer_alerts,
            } => {
                writeln!(f, "the peer rejected the handshake")?;
                for alert in peer_alerts {
                    writeln!(f, "peer sent alert: {alert}")?;
                }
                writeln!(f, "offered protocols: {}", join(protocols))?;
                if cipher_suites.is_empty() {
                    writeln!(f, "offered cipher suites: engine defaults")?;
                } else {
                    writeln!(f, "offered cipher suites: {}", join(cipher_suites))?;
                }
                writeln!(f, "check the peer's logs for the reason it refused these parameters")
            }
            Diagnosis::Generic => Ok(()),
        }
    }
}

/// 共享同一根因的一组失败。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGroup {
    /// 根因。
    pub cause: RootCause,
    /// 根因与代表成员消息首行。
    pub headline: String,
    /// 组内全部地址，保持输入顺序。
    pub addresses: Vec<SocketAddr>,
    /// 代表成员的其余消息行。
    pub details: Vec<String>,
    /// 诊断。
    pub diagnosis: Diagnosis,
}

impl fmt::Display for FailureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline)?;
        writeln!(f, "  addresses: {}", join(&self.addresses))?;
        for line in &self.details {
            writeln!(f, "  {line}")?;
        }
        let diagnosis = self.diagnosis.to_string();
        for line in diagnosis.lines() {
            writeln!(f, "  | {line}")?;
        }
        Ok(())
    }
}

/// 诊断报告。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosisReport {
    groups: Vec<FailureGroup>,
    successes: Vec<(Endpoint, Option<SessionInfo>, Duration)>,
}

impl DiagnosisReport {
    /// 失败组，按根因排序。
    pub fn groups(&self) -> &[FailureGroup] {
        &self.groups
    }

    /// 成功的端点及其会话参数与耗时，保持输入顺序。
    pub fn successes(&self) -> &[(Endpoint, Option<SessionInfo>, Duration)] {
        &self.successes
    }

    /// 失败的端点数。
    pub fn failed(&self) -> usize {
        self.groups.iter().map(|group| group.addresses.len()).sum()
    }

    /// 全部成功。
    pub fn all_succeeded(&self) -> bool {
        self.groups.is_empty()
    }
}

impl fmt::Display for DiagnosisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.failed() + self.successes.len();
        writeln!(f, "{} of {total} endpoints failed", self.failed())?;
        for group in &self.groups {
            writeln!(f)?;
            write!(f, "{group}")?;
        }
        if !self.successes.is_empty() {
            writeln!(f)?;
            writeln!(f, "succeeded:")?;
            for (endpoint, session, elapsed) in &self.successes {
                match session {
                    Some(session) => writeln!(
                        f,
                        "  {} {session} ({} ms)",
                        endpoint.address,
                        elapsed.as_millis()
                    )?,
                    None => writeln!(f, "  {} ({} ms)", endpoint.address, elapsed.as_millis())?,
                }
            }
        }
        Ok(())
    }
}

/// 报告生成器。
#[derive(Debug, Clone)]
pub struct Reporter {
    analyzer: ChainAnalyzer,
    protocols: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
}

impl Reporter {
    /// 以探测参数构造；链分析依次查询配置的信任库与平台信任库。
    pub fn new(config: &ProbeConfig) -> Self {
        Self::with_analyzer(config, ChainAnalyzer::from_config(config))
    }

    /// 使用指定的链分析器。
    pub fn with_analyzer(config: &ProbeConfig, analyzer: ChainAnalyzer) -> Self {
        Self {
            analyzer,
            protocols: config.protocols().to_vec(),
            cipher_suites: config.cipher_suites().to_vec(),
        }
    }

    /// 归组并生成诊断。
    pub fn analyze(&self, outcomes: &[Outcome]) -> DiagnosisReport {
        let mut grouped: BTreeMap<RootCause, Vec<(&Outcome, Blame)>> = BTreeMap::new();
        let mut successes = Vec::new();

        for outcome in outcomes {
            if outcome.success() {
                successes.push((
                    outcome.endpoint().clone(),
                    outcome.session().cloned(),
                    outcome.elapsed(),
                ));
                continue;
            }
            let resolved = resolve(outcome);
            grouped
                .entry(resolved.cause.clone())
                .or_default()
                .push((outcome, resolved));
        }

        let groups = grouped
            .into_iter()
            .filter_map(|(cause, members)| self.group(cause, &members))
            .collect();
        DiagnosisReport { groups, successes }
    }

    fn group(&self, cause: RootCause, members: &[(&Outcome, Blame)]) -> Option<FailureGroup> {
        let (representative, resolved) = members.first()?;
        let mut lines = match representative.error() {
            Some(error) => error.report_lines(),
            None => vec![resolved.message.clone()],
        };
        let first = if lines.is_empty() {
            resolved.message.clone()
        } else {
            lines.remove(0)
        };
        let diagnosis = self.diagnose(&cause, representative);
        Some(FailureGroup {
            headline: format!("[{cause}] {first}"),
            cause,
            addresses: members
                .iter()
                .map(|(outcome, _)| outcome.endpoint().address)
                .collect(),
            details: lines,
            diagnosis,
        })
    }

    fn diagnose(&self, cause: &RootCause, representative: &Outcome) -> Diagnosis {
        match cause {
            RootCause::CertificatePath => Diagnosis::CertificatePath {
                analysis: representative.peer_chain().map(|chain| {
                    self.analyzer
                        .analyze(&chain.certificates, representative.trust_failure())
                }),
                trust_stores: self
                    .analyzer
                    .stores()
                    .iter()
                    .map(|store| (store.name().to_owned(), store.len()))
                    .collect(),
            },
            RootCause::UnexpectedEof => Diagnosis::UnexpectedEof {
                protocols: self.protocols.clone(),
            },
            RootCause::HandshakeRejected => Diagnosis::HandshakeRejected {
                protocols: self.protocols.clone(),
                cipher_suites: self.cipher_suites.clone(),
                peer_alerts: peer_alerts(representative),
            },
            _ => Diagnosis::Generic,
        }
    }
}

fn peer_alerts(outcome: &Outcome) -> Vec<String> {
    let replayed: Vec<String> = outcome
        .forensics()
        .map(|report| {
            report
                .alerts()
                .filter(|(direction, alert)| {
                    *direction == Direction::Inbound && alert.level == AlertLevel::Fatal
                })
                .map(|(_, alert)| alert.to_string())
                .collect()
        })
        .unwrap_or_default();
    if !replayed.is_empty() {
        return replayed;
    }

    let Some(alert) = outcome.error().and_then(|error| received_alert(error)) else {
        return Vec::new();
    };
    let text = match AlertDescription::from_code(u8::from(alert)) {
        Ok(description) => Alert::fatal(description).to_string(),
        Err(_) => format!("fatal {alert:?}"),
    };
    vec![text]
}

fn resolve(outcome: &Outcome) -> Blame {
    match (outcome.error(), outcome.trust_failure()) {
        (Some(error), _) => blame(error),
        (None, Some(failure)) => Blame {
            cause: RootCause::CertificatePath,
            message: failure.to_string(),
        },
        (None, None) => Blame {
            cause: RootCause::Other,
            message: "unknown failure".into(),
        },
    }
}
