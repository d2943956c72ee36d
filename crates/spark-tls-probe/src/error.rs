//! 探测错误与阶段映射。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每次尝试最多在一个阶段终止；调用方与报告器需要知道“停在了哪一阶段”以及稳定的错误码，
//!   而不必解析底层库的文案。
//! - 底层原因（`io::Error`、`rustls::Error` 等）原样保留在 `source()` 链上，供 [`crate::blame`] 解析根因。
//!
//! ## 逻辑（How）
//! - `StageKind` 描述一个阶段的错误码、默认文案与所属 [`FailureStage`]；
//! - `map_*` 系列函数把具体错误包装为 [`ProbeError`]，超时统一以 `io::ErrorKind::TimedOut` 作为原因。
//!
//! ## 契约（What）
//! - [`ProbeError::code`] 始终为 `'static` 字符串，遵循 `spark.tls.probe.<语义>` 命名；
//! - [`ProbeError::report_lines`] 返回“自身消息 + 每层原因”的逐行渲染，首行即摘要。

use std::{borrow::Cow, error::Error, fmt, io};

/// 失败发生的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureStage {
    /// TCP 连接被拒绝、不可达或超时。
    Connect,
    /// TLS 握手过程中的 I/O 或协议错误。
    Handshake,
    /// 对端证书链未通过信任校验。
    Trust,
    /// 对端证书不匹配期望的主机名（仅在开启校验时出现）。
    Hostname,
    /// 实现缺陷，例如观测缓冲溢出。
    Bug,
}

impl FailureStage {
    /// 阶段名称。
    pub const fn name(self) -> &'static str {
        match self {
            FailureStage::Connect => "connect",
            FailureStage::Handshake => "handshake",
            FailureStage::Trust => "trust",
            FailureStage::Hostname => "hostname",
            FailureStage::Bug => "bug",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次尝试的终止错误。
///
/// 结构与框架核心错误一致：稳定错误码、面向排障人员的消息、可选的底层原因。
#[derive(Debug)]
pub struct ProbeError {
    code: &'static str,
    stage: FailureStage,
    message: Cow<'static, str>,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ProbeError {
    /// 构造不带原因的错误。
    pub fn new(
        code: &'static str,
        stage: FailureStage,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 失败阶段。
    pub fn stage(&self) -> FailureStage {
        self.stage
    }

    /// 错误消息（不含原因）。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 逐行渲染：第一行为自身消息，其后每层原因一行。
    ///
    /// `io::Error` 的 `source()` 会跳过其包装的内层错误，这里与根因解析一样经 `get_ref()` 穿透。
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = vec![self.message.to_string()];
        let mut previous = String::new();
        let mut current: Option<&(dyn Error + 'static)> = self.source();
        while let Some(err) = current {
            let rendered = err.to_string();
            if rendered != previous {
                lines.push(format!("caused by: {rendered}"));
            }
            previous = rendered;
            current = crate::blame::next_cause(err);
        }
        lines
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 一类阶段错误的错误码与默认文案。
#[derive(Clone, Copy)]
pub(crate) struct StageKind {
    pub code: &'static str,
    pub message: &'static str,
    pub stage: FailureStage,
}

pub(crate) const CONNECT: StageKind = StageKind {
    code: "spark.tls.probe.connect_failed",
    message: "tcp connect",
    stage: FailureStage::Connect,
};

pub(crate) const HANDSHAKE: StageKind = StageKind {
    code: "spark.tls.probe.handshake_failed",
    message: "tls handshake",
    stage: FailureStage::Handshake,
};

pub(crate) const TRUST: StageKind = StageKind {
    code: "spark.tls.probe.untrusted_chain",
    message: "peer certificate chain",
    stage: FailureStage::Trust,
};

pub(crate) const HOSTNAME: StageKind = StageKind {
    code: "spark.tls.probe.hostname_mismatch",
    message: "hostname verification",
    stage: FailureStage::Hostname,
};

pub(crate) const OBSERVER_BUG: StageKind = StageKind {
    code: "spark.tls.probe.observer_bug",
    message: "handshake observer",
    stage: FailureStage::Bug,
};

/// 把阶段内的错误包装为 [`ProbeError`]。
pub(crate) fn map_stage_error(
    kind: StageKind,
    error: impl Error + Send + Sync + 'static,
) -> ProbeError {
    ProbeError::new(kind.code, kind.stage, format!("{} failed", kind.message)).with_cause(error)
}

/// 构造超时错误；原因统一为 `TimedOut` 以便根因解析。
pub(crate) fn timeout_error(kind: StageKind, limit: std::time::Duration) -> ProbeError {
    ProbeError::new(
        kind.code,
        kind.stage,
        format!("{} timed out after {} ms", kind.message, limit.as_millis()),
    )
    .with_cause(io::Error::from(io::ErrorKind::TimedOut))
}
