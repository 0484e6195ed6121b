//! 와이어 레코드 — 수집 파이프라인과 수집 서버가 교환하는 단위
//!
//! 분류 결과는 닫힌 enum [`Classified`]로 표현됩니다. 알려진 패턴에 매칭된
//! 라인은 [`EventRecord`]로 승격되어 fingerprint를 갖고, 매칭되지 않은 라인은
//! [`EvidenceRecord`]로 보존됩니다. 하류 코드는 두 변형을 망라적으로 처리하며
//! 선택 필드를 더듬어 볼 필요가 없습니다.
//!
//! fingerprint는 조건 식별 필드(장비, 인터페이스, MAC, 방향)로만 구성되며
//! 벽시계 시간이나 카운터를 절대 포함하지 않습니다. 같은 조건의 반복 발생은
//! 수집 서버에서 같은 집계 레코드로 합쳐집니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 토큰 종류별 마스킹 치환 횟수 (예: "IP" -> 2)
///
/// BTreeMap을 사용하여 직렬화 순서를 결정적으로 유지합니다.
pub type MaskStats = BTreeMap<String, u64>;

/// 이벤트 레코드에 부착되는 마스킹 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// 마스킹 엔진 통과 여부
    pub masked: bool,
    /// 토큰 종류별 치환 횟수
    #[serde(default)]
    pub mask_stats: MaskStats,
}

/// 알려진 이벤트 패턴에 매칭된 레코드
///
/// 수집 서버의 이벤트 엔드포인트로 전송되며, fingerprint 기준으로 집계됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 수집 시각 (UTC)
    pub timestamp: DateTime<Utc>,
    /// 장비 호스트명 (마스킹 적용 후)
    pub host: String,
    /// 로그를 생성한 프로그램명
    pub program: String,
    /// 로그 본문 (마스킹 적용 후)
    pub msg: String,
    /// 이벤트 계열 태그 (예: "SWITCH_LINK")
    pub category: String,
    /// 사람이 읽는 한 줄 요약
    pub title: String,
    /// 시간 독립적인 조건 식별 키
    pub fingerprint: String,
    /// 마스킹 메타데이터
    pub meta: RecordMeta,
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventRecord[{}] host={} fp={}",
            self.category, self.host, self.fingerprint,
        )
    }
}

/// 알려진 패턴에 매칭되지 않아 증거로만 보존되는 레코드
///
/// 수집 서버의 증거 엔드포인트로 전송되며, 점수화 대상은 아니지만
/// 이후 상관 분석을 위해 유지됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// 수집 시각 (UTC)
    pub timestamp: DateTime<Utc>,
    /// 장비 호스트명 (마스킹 적용 후)
    pub host: String,
    /// 추정 출처 태그 ("fortigate", "ad", "vpn", "ueba", "syslog")
    pub source: String,
    /// 로그 본문 (마스킹 적용 후)
    pub message: String,
    /// 부가 필드
    pub fields: EvidenceFields,
}

/// 증거 레코드의 부가 필드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFields {
    /// 로그를 생성한 프로그램명
    pub program: String,
    /// 마스킹 엔진 통과 여부
    pub masked: bool,
    /// 토큰 종류별 치환 횟수
    #[serde(default)]
    pub mask_stats: MaskStats,
    /// 중복 제거용 다이제스트 (조건 키가 아닌 내용 해시)
    pub fingerprint: String,
}

impl fmt::Display for EvidenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EvidenceRecord[{}] host={} digest={}",
            self.source, self.host, self.fields.fingerprint,
        )
    }
}

/// 분류 결과 — 이벤트 또는 증거
///
/// 라인 분류기의 출력이며, 전달기가 변형에 따라 엔드포인트를 선택합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Classified {
    /// 알려진 이벤트 패턴에 매칭됨
    Event(EventRecord),
    /// 매칭 실패, 증거로 보존
    Evidence(EvidenceRecord),
}

impl Classified {
    /// 수집 시각을 반환합니다.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Classified::Event(e) => e.timestamp,
            Classified::Evidence(e) => e.timestamp,
        }
    }

    /// 마스킹된 호스트명을 반환합니다.
    pub fn host(&self) -> &str {
        match self {
            Classified::Event(e) => &e.host,
            Classified::Evidence(e) => &e.host,
        }
    }

    /// 이벤트 변형인지 확인합니다.
    pub fn is_event(&self) -> bool {
        matches!(self, Classified::Event(_))
    }
}

impl fmt::Display for Classified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classified::Event(e) => fmt::Display::fmt(e, f),
            Classified::Evidence(e) => fmt::Display::fmt(e, f),
        }
    }
}
