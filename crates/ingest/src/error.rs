//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 tail 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<IngestError> for OpstailError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use opstail_core::error::{OpstailError, PipelineError};

/// 수집 파이프라인 도메인 에러
///
/// 위치 추적, 마스킹, 전달, 설정 등 파이프라인 내부의
/// 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 위치 북마크 처리 실패
    #[error("position error: {path}: {reason}")]
    Position {
        /// 북마크 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 마스킹 매핑 처리 실패
    #[error("mask mapping error: {path}: {reason}")]
    Mapping {
        /// 매핑 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 재시도 소진 후 전달 실패
    #[error("forward error: {url}: gave up after {attempts} attempts")]
    Forward {
        /// 대상 엔드포인트 URL
        url: String,
        /// 수행한 시도 횟수
        attempts: u32,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// HTTP 클라이언트 에러
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 직렬화/역직렬화 에러
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<IngestError> for OpstailError {
    fn from(err: IngestError) -> Self {
        OpstailError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
