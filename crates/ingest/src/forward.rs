//! 전달기 -- 분류된 레코드의 수집 서버 전달
//!
//! [`Forwarder`]는 레코드를 JSON으로 직렬화해 수집 서버에 POST합니다.
//! 이벤트와 증거는 서로 다른 엔드포인트로 전송됩니다.
//!
//! # 재시도 규율
//! 요청당 타임아웃이 걸린 시도를 최대 `retry_max`회 수행하며, 시도 사이에는
//! 시도 횟수에 비례해 길어지는 백오프를 둡니다. 재시도를 소진하면 에러를
//! 반환하고, 호출자(tail 루프)는 위치를 전진시키지 않아 최소 한 번 전달을
//! 보장합니다. 중복 전달 가능성은 수신측 fingerprint 집계가 흡수합니다.

use std::time::Duration;

use metrics::counter;
use serde::Serialize;

use opstail_core::config::ForwardConfig;
use opstail_core::metrics::{
    INGEST_FORWARD_FAILURES_TOTAL, INGEST_FORWARDED_TOTAL, LABEL_RECORD_KIND,
};
use opstail_core::record::Classified;

use crate::error::IngestError;

/// HTTP 전달기
pub struct Forwarder {
    /// 공유 HTTP 클라이언트 (요청 타임아웃 포함)
    client: reqwest::Client,
    /// 이벤트 엔드포인트 URL
    event_url: String,
    /// 증거 엔드포인트 URL
    evidence_url: String,
    /// 최대 시도 횟수
    retry_max: u32,
    /// 백오프 기본 단위
    retry_backoff: Duration,
}

impl Forwarder {
    /// 설정으로부터 전달기를 생성합니다.
    pub fn new(config: &ForwardConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            event_url: config.event_url.clone(),
            evidence_url: config.evidence_url.clone(),
            retry_max: config.retry_max.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// 레코드를 변형에 맞는 엔드포인트로 전달합니다.
    pub async fn deliver(&self, record: &Classified) -> Result<(), IngestError> {
        let (url, kind, result) = match record {
            Classified::Event(event) => (
                &self.event_url,
                "event",
                self.post_with_retry(&self.event_url, event).await,
            ),
            Classified::Evidence(evidence) => (
                &self.evidence_url,
                "evidence",
                self.post_with_retry(&self.evidence_url, evidence).await,
            ),
        };

        match &result {
            Ok(()) => {
                counter!(INGEST_FORWARDED_TOTAL, LABEL_RECORD_KIND => kind).increment(1);
            }
            Err(e) => {
                counter!(INGEST_FORWARD_FAILURES_TOTAL).increment(1);
                tracing::warn!(url = url.as_str(), error = %e, "record delivery failed");
            }
        }
        result
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(), IngestError> {
        for attempt in 1..=self.retry_max {
            match self.client.post(url).json(body).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(url, attempt, error = %e, "collector rejected record");
                    }
                },
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "failed to reach collector");
                }
            }

            if attempt < self.retry_max {
                // 선형 백오프: backoff * 시도 횟수
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        }

        Err(IngestError::Forward {
            url: url.to_owned(),
            attempts: self.retry_max,
        })
    }
}
