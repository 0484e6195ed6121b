//! 설정 관리 — opstail.toml 파싱 및 런타임 설정
//!
//! [`OpstailConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`OPSTAIL_TAIL_SOURCE_PATH=/var/log/remote.log` 형식)
//! 3. 설정 파일 (`opstail.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), opstail_core::error::OpstailError> {
//! use opstail_core::config::OpstailConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = OpstailConfig::load("opstail.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = OpstailConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, OpstailError};

/// Opstail 통합 설정
///
/// `opstail.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpstailConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 소스 파일 tail 설정
    #[serde(default)]
    pub tail: TailConfig,
    /// 마스킹 엔진 설정
    #[serde(default)]
    pub mask: MaskConfig,
    /// 전달기(HTTP) 설정
    #[serde(default)]
    pub forward: ForwardConfig,
    /// 수집 서버 집계 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
}

impl OpstailConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, OpstailError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, OpstailError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpstailError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                OpstailError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, OpstailError> {
        toml::from_str(toml_str).map_err(|e| {
            OpstailError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `OPSTAIL_{SECTION}_{FIELD}`
    /// 예: `OPSTAIL_MASK_SECRET=...`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "OPSTAIL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "OPSTAIL_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "OPSTAIL_GENERAL_DATA_DIR");

        // Tail
        override_string(&mut self.tail.source_path, "OPSTAIL_TAIL_SOURCE_PATH");
        override_string(&mut self.tail.position_path, "OPSTAIL_TAIL_POSITION_PATH");
        override_u64(
            &mut self.tail.poll_interval_ms,
            "OPSTAIL_TAIL_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.tail.persist_interval_ms,
            "OPSTAIL_TAIL_PERSIST_INTERVAL_MS",
        );
        override_string(&mut self.tail.on_rotate, "OPSTAIL_TAIL_ON_ROTATE");
        override_bool(&mut self.tail.raw_tap_enable, "OPSTAIL_TAIL_RAW_TAP_ENABLE");
        override_string(&mut self.tail.raw_tap_path, "OPSTAIL_TAIL_RAW_TAP_PATH");

        // Mask
        override_bool(&mut self.mask.enabled, "OPSTAIL_MASK_ENABLED");
        override_string(&mut self.mask.secret, "OPSTAIL_MASK_SECRET");
        override_bool(&mut self.mask.reversible, "OPSTAIL_MASK_REVERSIBLE");
        override_string(&mut self.mask.mapping_path, "OPSTAIL_MASK_MAPPING_PATH");
        override_bool(
            &mut self.mask.keep_private_ranges,
            "OPSTAIL_MASK_KEEP_PRIVATE_RANGES",
        );

        // Forward
        override_string(&mut self.forward.event_url, "OPSTAIL_FORWARD_EVENT_URL");
        override_string(
            &mut self.forward.evidence_url,
            "OPSTAIL_FORWARD_EVIDENCE_URL",
        );
        override_u64(&mut self.forward.timeout_ms, "OPSTAIL_FORWARD_TIMEOUT_MS");
        override_u32(&mut self.forward.retry_max, "OPSTAIL_FORWARD_RETRY_MAX");
        override_u64(
            &mut self.forward.retry_backoff_ms,
            "OPSTAIL_FORWARD_RETRY_BACKOFF_MS",
        );

        // Store
        override_usize(&mut self.store.capacity, "OPSTAIL_STORE_CAPACITY");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), OpstailError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        let valid_rotate = ["end", "start"];
        if !valid_rotate.contains(&self.tail.on_rotate.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "tail.on_rotate".to_owned(),
                reason: format!("must be one of: {}", valid_rotate.join(", ")),
            }
            .into());
        }

        if self.tail.source_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tail.source_path".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.tail.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tail.poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.forward.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "forward.timeout_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.forward.retry_max == 0 {
            return Err(ConfigError::InvalidValue {
                field: "forward.retry_max".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        if self.store.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리 (북마크/매핑 파일 기본 위치)
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/opstail".to_owned(),
        }
    }
}

/// 소스 파일 tail 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// 감시할 로그 파일 경로
    pub source_path: String,
    /// 위치 북마크 파일 경로
    pub position_path: String,
    /// 새 데이터 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 위치 영속화 최소 간격 (밀리초)
    pub persist_interval_ms: u64,
    /// 로테이션 감지 시 재개 위치 ("end" | "start")
    pub on_rotate: String,
    /// 원본 평문 로컬 사본 활성화 (전송되지 않음)
    pub raw_tap_enable: bool,
    /// 원본 평문 사본 파일 경로
    pub raw_tap_path: String,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            source_path: "/var/log/rsyslog-remote.log".to_owned(),
            position_path: "/var/lib/opstail/tail_position.json".to_owned(),
            poll_interval_ms: 100,
            persist_interval_ms: 1000,
            on_rotate: "end".to_owned(),
            raw_tap_enable: false,
            raw_tap_path: "/var/lib/opstail/raw_tap.log".to_owned(),
        }
    }
}

/// 마스킹 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// 마스킹 활성화 여부
    pub enabled: bool,
    /// 토큰 유도용 비밀키 (12바이트 이상 권장)
    pub secret: String,
    /// 역방향(토큰 -> 원문) 매핑 유지 여부
    pub reversible: bool,
    /// 매핑 파일 경로
    pub mapping_path: String,
    /// 사설/루프백 IPv4 대역 마스킹 제외
    pub keep_private_ranges: bool,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: String::new(),
            reversible: false,
            mapping_path: "/var/lib/opstail/mask_map.json".to_owned(),
            keep_private_ranges: false,
        }
    }
}

/// 전달기(HTTP) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// 이벤트 수집 엔드포인트 URL
    pub event_url: String,
    /// 증거 수집 엔드포인트 URL
    pub evidence_url: String,
    /// 요청 타임아웃 (밀리초)
    pub timeout_ms: u64,
    /// 최대 시도 횟수
    pub retry_max: u32,
    /// 재시도 백오프 기본 단위 (밀리초, 시도 횟수에 비례해 증가)
    pub retry_backoff_ms: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            event_url: "http://127.0.0.1:8000/api/ingest/syslog".to_owned(),
            evidence_url: "http://127.0.0.1:8000/api/evidence/ingest".to_owned(),
            timeout_ms: 3000,
            retry_max: 3,
            retry_backoff_ms: 300,
        }
    }
}

/// 수집 서버 집계 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 유지할 최대 집계 레코드 수 (초과 시 가장 오래된 last_seen 축출)
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
