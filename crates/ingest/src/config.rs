//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`OpstailConfig`](opstail_core::config::OpstailConfig)에서
//! tail 파이프라인이 사용하는 섹션을 모아 검증된 형태로 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use opstail_core::config::OpstailConfig;
//! use opstail_ingest::config::IngestConfig;
//!
//! let core_config = OpstailConfig::default();
//! let config = IngestConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use opstail_core::config::{ForwardConfig, MaskConfig};

use crate::error::IngestError;

/// 로테이션 감지 시 재개 위치 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotatePolicy {
    /// 새 파일의 끝에서 재개 (기본값) -- 로테이션된 파일 전체 재수집 방지
    #[default]
    End,
    /// 새 파일의 처음부터 재개
    Start,
}

impl RotatePolicy {
    /// 설정 문자열을 정책으로 변환합니다.
    pub fn from_config_str(value: &str) -> Result<Self, IngestError> {
        match value {
            "end" => Ok(Self::End),
            "start" => Ok(Self::Start),
            other => Err(IngestError::Config {
                field: "tail.on_rotate".to_owned(),
                reason: format!("unknown policy '{other}', expected 'end' or 'start'"),
            }),
        }
    }
}

/// 수집 파이프라인 설정
///
/// core 설정의 `[tail]`, `[mask]`, `[forward]` 섹션에서 파생됩니다.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 감시할 로그 파일 경로
    pub source_path: PathBuf,
    /// 위치 북마크 파일 경로
    pub position_path: PathBuf,
    /// 새 데이터 폴링 주기
    pub poll_interval: Duration,
    /// 북마크 영속화 최소 간격
    pub persist_interval: Duration,
    /// 로테이션 감지 시 재개 위치
    pub on_rotate: RotatePolicy,
    /// 원본 평문 로컬 사본 활성화
    pub raw_tap_enable: bool,
    /// 원본 평문 사본 파일 경로
    pub raw_tap_path: PathBuf,
    /// 마스킹 엔진 설정
    pub mask: MaskConfig,
    /// 전달기 설정
    pub forward: ForwardConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("/var/log/rsyslog-remote.log"),
            position_path: PathBuf::from("/var/lib/opstail/tail_position.json"),
            poll_interval: Duration::from_millis(100),
            persist_interval: Duration::from_millis(1000),
            on_rotate: RotatePolicy::End,
            raw_tap_enable: false,
            raw_tap_path: PathBuf::from("/var/lib/opstail/raw_tap.log"),
            mask: MaskConfig::default(),
            forward: ForwardConfig::default(),
        }
    }
}

impl IngestConfig {
    /// core 설정에서 수집 파이프라인 설정을 생성합니다.
    pub fn from_core(
        core: &opstail_core::config::OpstailConfig,
    ) -> Result<Self, IngestError> {
        let config = Self {
            source_path: PathBuf::from(&core.tail.source_path),
            position_path: PathBuf::from(&core.tail.position_path),
            poll_interval: Duration::from_millis(core.tail.poll_interval_ms),
            persist_interval: Duration::from_millis(core.tail.persist_interval_ms),
            on_rotate: RotatePolicy::from_config_str(&core.tail.on_rotate)?,
            raw_tap_enable: core.tail.raw_tap_enable,
            raw_tap_path: PathBuf::from(&core.tail.raw_tap_path),
            mask: core.mask.clone(),
            forward: core.forward.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(IngestError::Config {
                field: "tail.source_path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.position_path.as_os_str().is_empty() {
            return Err(IngestError::Config {
                field: "tail.position_path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.poll_interval.is_zero() {
            return Err(IngestError::Config {
                field: "tail.poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.forward.event_url.is_empty() || self.forward.evidence_url.is_empty() {
            return Err(IngestError::Config {
                field: "forward.event_url".to_owned(),
                reason: "event and evidence endpoint urls must not be empty".to_owned(),
            });
        }

        if self.forward.retry_max == 0 {
            return Err(IngestError::Config {
                field: "forward.retry_max".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        if self.raw_tap_enable && self.raw_tap_path.as_os_str().is_empty() {
            return Err(IngestError::Config {
                field: "tail.raw_tap_path".to_owned(),
                reason: "must not be empty when raw_tap_enable is set".to_owned(),
            });
        }

        Ok(())
    }
}

/// 수집 파이프라인 설정 빌더
///
/// 테스트와 데몬 외 환경에서 설정 파일 없이 파이프라인을 구성할 때 사용합니다.
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 감시할 로그 파일 경로를 설정합니다.
    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.source_path = path.into();
        self
    }

    /// 위치 북마크 파일 경로를 설정합니다.
    pub fn position_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.position_path = path.into();
        self
    }

    /// 폴링 주기를 설정합니다.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// 북마크 영속화 최소 간격을 설정합니다.
    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.config.persist_interval = interval;
        self
    }

    /// 로테이션 정책을 설정합니다.
    pub fn on_rotate(mut self, policy: RotatePolicy) -> Self {
        self.config.on_rotate = policy;
        self
    }

    /// 원본 평문 사본을 활성화합니다.
    pub fn raw_tap(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.raw_tap_enable = true;
        self.config.raw_tap_path = path.into();
        self
    }

    /// 마스킹 설정을 지정합니다.
    pub fn mask(mut self, mask: MaskConfig) -> Self {
        self.config.mask = mask;
        self
    }

    /// 전달기 설정을 지정합니다.
    pub fn forward(mut self, forward: ForwardConfig) -> Self {
        self.config.forward = forward;
        self
    }

    /// 설정을 검증하고 `IngestConfig`를 생성합니다.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
