//! 파이프라인 통합 테스트 -- tail부터 전달/위치 전진까지의 전체 흐름
//!
//! 실제 파일과 스텁 수집 서버를 사용하여 다음을 검증합니다:
//! - 라인이 마스킹/분류되어 올바른 엔드포인트로 전달되는지
//! - 전달 성공 시에만 위치가 전진하는지
//! - 실행 중 추가된 라인과 로테이션된 파일을 따라가는지

mod common;

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use common::StubCollector;

use opstail_core::config::{ForwardConfig, MaskConfig};
use opstail_ingest::position::{PositionTracker, TailPosition};
use opstail_ingest::{
    IngestConfig, IngestConfigBuilder, RotatePolicy, TailPipeline, TailPipelineBuilder,
};

const EVENT_LINE: &str =
    "Dec 26 19:30:12 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.\n";
const EVIDENCE_LINE: &str =
    "Dec 26 19:30:13 2025 fw-edge: srcip=203.0.113.9 dstip=198.51.100.7 policyid=7 action=deny\n";

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn source(&self) -> std::path::PathBuf {
        self.dir.path().join("source.log")
    }

    fn position(&self) -> std::path::PathBuf {
        self.dir.path().join("position.json")
    }

    fn config(&self, stub: &StubCollector, on_rotate: RotatePolicy) -> IngestConfig {
        IngestConfigBuilder::new()
            .source_path(self.source())
            .position_path(self.position())
            .poll_interval(Duration::from_millis(20))
            .persist_interval(Duration::from_millis(0))
            .on_rotate(on_rotate)
            .mask(MaskConfig {
                enabled: true,
                secret: "integration-test-secret-key".to_owned(),
                reversible: false,
                mapping_path: self
                    .dir
                    .path()
                    .join("map.json")
                    .to_string_lossy()
                    .into_owned(),
                keep_private_ranges: false,
            })
            .forward(ForwardConfig {
                event_url: stub.url("/api/ingest/syslog"),
                evidence_url: stub.url("/api/evidence/ingest"),
                timeout_ms: 1000,
                retry_max: 3,
                retry_backoff_ms: 10,
            })
            .build()
            .expect("build config")
    }

    /// 소스 파일 처음부터 읽도록 현재 inode + offset 0 북마크를 심습니다.
    async fn seed_bookmark_at_start(&self) {
        let file_id = PositionTracker::resolve_identity(self.source())
            .await
            .expect("source inode");
        let position = TailPosition {
            path: self.source(),
            file_id,
            offset: 0,
            updated_at: chrono::Utc::now(),
        };
        tokio::fs::write(
            self.position(),
            serde_json::to_vec(&position).expect("serialize bookmark"),
        )
        .await
        .expect("write bookmark");
    }

    async fn persisted_offset(&self) -> u64 {
        let content = tokio::fs::read_to_string(self.position())
            .await
            .expect("read bookmark");
        let position: TailPosition = serde_json::from_str(&content).expect("parse bookmark");
        position.offset
    }
}

async fn spawn_pipeline(
    config: IngestConfig,
) -> (tokio::task::JoinHandle<TailPipeline>, CancellationToken) {
    let mut pipeline = TailPipelineBuilder::new()
        .config(config)
        .build()
        .await
        .expect("build pipeline");
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        pipeline.run(task_cancel).await.expect("pipeline run");
        pipeline
    });
    (handle, cancel)
}

async fn append_line(path: &Path, line: &str) {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .expect("open source");
    file.write_all(line.as_bytes()).await.expect("append line");
    file.flush().await.expect("flush source");
}

#[tokio::test]
async fn lines_flow_masked_to_their_endpoints_and_advance_position() {
    let fixture = Fixture::new();
    let stub = StubCollector::spawn(vec![200]).await;

    tokio::fs::write(
        fixture.source(),
        format!("{EVENT_LINE}{EVIDENCE_LINE}"),
    )
    .await
    .unwrap();
    fixture.seed_bookmark_at_start().await;

    let (handle, cancel) = spawn_pipeline(fixture.config(&stub, RotatePolicy::End)).await;
    assert!(stub.wait_for_hits(2).await, "expected two deliveries");
    cancel.cancel();
    let pipeline = handle.await.unwrap();

    assert_eq!(pipeline.lines_read(), 2);
    assert_eq!(pipeline.forwarded_count(), 2);
    assert_eq!(pipeline.failure_count(), 0);

    // 전달된 총 바이트만큼 북마크가 전진
    let source_len = tokio::fs::metadata(fixture.source()).await.unwrap().len();
    assert_eq!(fixture.persisted_offset().await, source_len);

    let requests = stub.requests().await;
    assert_eq!(requests.len(), 2);

    let (event_path, event_body) = &requests[0];
    assert_eq!(event_path, "/api/ingest/syslog");
    let event: serde_json::Value = serde_json::from_str(event_body).unwrap();
    assert_eq!(event["fingerprint"], "h3c|SW01|GigabitEthernet1/0/1|link_down");
    assert_eq!(event["title"], "SW01 GigabitEthernet1/0/1 link down");

    let (evidence_path, evidence_body) = &requests[1];
    assert_eq!(evidence_path, "/api/evidence/ingest");
    // 원본 IP는 호스트를 떠나지 않음
    assert!(!evidence_body.contains("203.0.113.9"));
    assert!(!evidence_body.contains("198.51.100.7"));
    assert!(evidence_body.contains("<IP:"));
    let evidence: serde_json::Value = serde_json::from_str(evidence_body).unwrap();
    assert_eq!(evidence["source"], "fortigate");
    assert_eq!(evidence["fields"]["mask_stats"]["IP"], 2);
}

#[tokio::test]
async fn delivery_failure_leaves_persisted_position_unchanged() {
    let fixture = Fixture::new();
    let stub = StubCollector::spawn(vec![500]).await;

    tokio::fs::write(fixture.source(), EVENT_LINE).await.unwrap();
    fixture.seed_bookmark_at_start().await;

    let (handle, cancel) = spawn_pipeline(fixture.config(&stub, RotatePolicy::End)).await;
    // retry_max=3 시도가 모두 소진될 때까지 대기
    assert!(stub.wait_for_hits(3).await, "expected three attempts");
    cancel.cancel();
    let pipeline = handle.await.unwrap();

    assert_eq!(pipeline.failure_count(), 1);
    assert_eq!(pipeline.forwarded_count(), 0);

    // 재시작 시 같은 라인부터 다시 읽도록 북마크는 0에 머무름
    assert_eq!(fixture.persisted_offset().await, 0);
}

#[tokio::test]
async fn lines_appended_while_running_are_picked_up() {
    let fixture = Fixture::new();
    let stub = StubCollector::spawn(vec![200]).await;

    // 빈 파일에서 시작: 북마크 없이도 끝(=0)에서 시작함
    tokio::fs::write(fixture.source(), "").await.unwrap();

    let (handle, cancel) = spawn_pipeline(fixture.config(&stub, RotatePolicy::End)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    append_line(&fixture.source(), EVENT_LINE).await;
    assert!(stub.wait_for_hits(1).await, "expected delivery of appended line");
    cancel.cancel();
    let pipeline = handle.await.unwrap();

    assert_eq!(pipeline.forwarded_count(), 1);
    assert_eq!(fixture.persisted_offset().await, EVENT_LINE.len() as u64);
}

#[tokio::test]
async fn rotation_is_detected_and_new_file_followed() {
    let fixture = Fixture::new();
    let stub = StubCollector::spawn(vec![200]).await;

    tokio::fs::write(fixture.source(), "").await.unwrap();

    // start 정책: 로테이션된 새 파일을 처음부터 읽음
    let (handle, cancel) = spawn_pipeline(fixture.config(&stub, RotatePolicy::Start)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    append_line(&fixture.source(), EVENT_LINE).await;
    assert!(stub.wait_for_hits(1).await, "expected pre-rotation delivery");

    // logrotate 방식: 원본을 옆으로 치우고 새 파일 생성
    tokio::fs::rename(fixture.source(), fixture.dir.path().join("source.log.1"))
        .await
        .unwrap();
    tokio::fs::write(fixture.source(), EVIDENCE_LINE).await.unwrap();

    assert!(stub.wait_for_hits(2).await, "expected post-rotation delivery");
    cancel.cancel();
    let pipeline = handle.await.unwrap();

    assert_eq!(pipeline.forwarded_count(), 2);

    let requests = stub.requests().await;
    assert_eq!(requests[1].0, "/api/evidence/ingest");
}
