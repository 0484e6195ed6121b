//! 파이프라인 오케스트레이션 -- tail/마스킹/분류/전달의 전체 흐름
//!
//! [`TailPipeline`]은 단일 태스크의 순차 루프로 동작합니다:
//!
//! ```text
//! read line -> raw tap -> mask -> classify -> forward -> advance position
//!     ^                                           |
//!     +--------- 실패 시 위치 비전진 <-------------+
//! ```
//!
//! 내부 병렬성은 없습니다. 처리량은 수집 서버 왕복 시간에 묶이며,
//! 로그 유입 속도가 완만하므로 충분합니다. 전달이 실패한 라인은 위치를
//! 전진시키지 않아 다음 기동에서 재전송됩니다 (최소 한 번 전달).
//!
//! 취소는 협력적입니다. 루프는 라인 사이에서 취소 토큰을 확인하고,
//! 종료 시 마지막 위치를 영속화합니다.

use std::io::SeekFrom;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;

use opstail_core::metrics::INGEST_LINES_TOTAL;
use opstail_core::record::RecordMeta;

use crate::classify::Classifier;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::forward::Forwarder;
use crate::mask::MaskingEngine;
use crate::position::PositionTracker;
use crate::tap::RawTap;

/// 전달 실패 후 다음 라인 전 대기 시간
const FAILURE_BACKOFF: Duration = Duration::from_millis(500);

/// 소스 파일 생성 대기 폴링 주기
const SOURCE_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// 유휴 폴링에서 관찰한 소스 파일 상태
enum SourceState {
    /// 같은 파일, 변화 없음
    Unchanged,
    /// inode 변경 또는 크기 축소 -- 재오픈 필요
    Reopen,
    /// 파일이 사라짐 -- 재생성 대기
    Missing,
}

/// tail 파이프라인
///
/// 모든 협력 객체(위치 추적기, 마스킹 엔진, 분류기, 전달기, raw tap)를
/// 명시적으로 소유합니다. 프로세스 시작 시 한 번 조립되며,
/// 테스트에서는 빌더로 독립 인스턴스를 만들 수 있습니다.
pub struct TailPipeline {
    config: IngestConfig,
    tracker: PositionTracker,
    masker: MaskingEngine,
    classifier: Classifier,
    forwarder: Forwarder,
    tap: RawTap,
    /// 읽은 라인 수
    lines_read: u64,
    /// 전달 성공 레코드 수
    forwarded_count: u64,
    /// 재시도 소진 후 실패한 레코드 수
    failure_count: u64,
}

impl TailPipeline {
    /// 읽은 라인 수를 반환합니다.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// 전달에 성공한 레코드 수를 반환합니다.
    pub fn forwarded_count(&self) -> u64 {
        self.forwarded_count
    }

    /// 재시도 소진 후 실패한 레코드 수를 반환합니다.
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// 현재 소비 오프셋을 반환합니다.
    pub fn offset(&self) -> u64 {
        self.tracker.offset()
    }

    /// 취소될 때까지 tail 루프를 실행합니다.
    ///
    /// 소스 파일이 없으면 종료하지 않고 생성을 기다립니다. 로테이션과
    /// 절단은 유휴 폴링에서 감지하여 파일을 다시 엽니다.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), IngestError> {
        tracing::info!(
            source = %self.config.source_path.display(),
            event_url = self.config.forward.event_url.as_str(),
            evidence_url = self.config.forward.evidence_url.as_str(),
            "tail pipeline starting"
        );

        'reopen: while !cancel.is_cancelled() {
            if !self.wait_for_source(&cancel).await {
                break;
            }

            let (mut reader, current_id, mut offset) = match self.open_source().await {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open source, retrying");
                    if !sleep_or_cancel(&cancel, SOURCE_WAIT_INTERVAL).await {
                        break;
                    }
                    continue 'reopen;
                }
            };

            let mut buf: Vec<u8> = Vec::new();
            loop {
                buf.clear();
                let n = tokio::select! {
                    _ = cancel.cancelled() => break 'reopen,
                    read = reader.read_until(b'\n', &mut buf) => read?,
                };

                if n == 0 {
                    // 새 데이터 없음: 보류 중인 위치를 영속화하고 파일 상태 점검
                    if let Err(e) = self.tracker.maybe_persist().await {
                        tracing::warn!(error = %e, "position persist failed, continuing");
                    }
                    if !sleep_or_cancel(&cancel, self.config.poll_interval).await {
                        break 'reopen;
                    }
                    match self.check_source(current_id, offset).await {
                        SourceState::Unchanged => continue,
                        SourceState::Reopen => continue 'reopen,
                        SourceState::Missing => continue 'reopen,
                    }
                }

                if !buf.ends_with(b"\n") {
                    // 쓰다 만 라인: 위치를 되돌리고 나머지를 기다림
                    reader.seek(SeekFrom::Start(offset)).await?;
                    if !sleep_or_cancel(&cancel, self.config.poll_interval).await {
                        break 'reopen;
                    }
                    continue;
                }

                let new_offset = offset + n as u64;
                let line = String::from_utf8_lossy(&buf).into_owned();
                self.lines_read += 1;
                counter!(INGEST_LINES_TOTAL).increment(1);

                self.tap.append(&line).await;

                let delivered = self.process_line(&line).await;
                if delivered {
                    self.forwarded_count += 1;
                    self.tracker.advance(new_offset);
                    if let Err(e) = self.tracker.maybe_persist().await {
                        tracing::warn!(error = %e, "position persist failed, continuing");
                    }
                } else {
                    // 위치를 전진시키지 않음: 이 라인은 다음 기동에서 재전송됨
                    self.failure_count += 1;
                    if !sleep_or_cancel(&cancel, FAILURE_BACKOFF).await {
                        break 'reopen;
                    }
                }
                offset = new_offset;
            }
        }

        if let Err(e) = self.tracker.persist().await {
            tracing::warn!(error = %e, "final position persist failed");
        }
        tracing::info!(
            lines = self.lines_read,
            forwarded = self.forwarded_count,
            failures = self.failure_count,
            "tail pipeline stopped"
        );
        Ok(())
    }

    /// 라인 하나를 마스킹/분류/전달합니다. 전달 성공 여부를 반환합니다.
    async fn process_line(&mut self, line: &str) -> bool {
        let parsed = self.classifier.parse_header(line);

        // 입구에서 즉시 마스킹: 이후 모든 처리는 마스킹된 값만 봅니다
        let (host_masked, host_stats) = self.masker.scrub(&parsed.host);
        let (msg_masked, msg_stats) = self.masker.scrub(&parsed.msg);

        let mut mask_stats = host_stats;
        for (kind, count) in msg_stats {
            *mask_stats.entry(kind).or_insert(0) += count;
        }

        let meta = RecordMeta {
            masked: self.masker.enabled(),
            mask_stats,
        };
        let record = self.classifier.classify(
            &host_masked,
            &parsed.program,
            &msg_masked,
            Utc::now(),
            meta,
        );

        self.forwarder.deliver(&record).await.is_ok()
    }

    /// 소스 파일이 나타날 때까지 대기합니다. 취소되면 `false`를 반환합니다.
    async fn wait_for_source(&self, cancel: &CancellationToken) -> bool {
        let mut logged = false;
        loop {
            if tokio::fs::metadata(&self.config.source_path).await.is_ok() {
                return true;
            }
            if !logged {
                tracing::info!(
                    source = %self.config.source_path.display(),
                    "waiting for source file to appear"
                );
                logged = true;
            }
            if !sleep_or_cancel(cancel, SOURCE_WAIT_INTERVAL).await {
                return false;
            }
        }
    }

    /// 소스 파일을 열고 저장된 위치와 대조한 뒤 seek합니다.
    async fn open_source(&mut self) -> Result<(BufReader<File>, u64, u64), IngestError> {
        let path = &self.config.source_path;
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        let current_id = PositionTracker::resolve_identity(path).await?;

        let resume = self
            .tracker
            .reconcile(current_id, meta.len(), self.config.on_rotate);

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(resume)).await?;
        tracing::info!(offset = resume, file_id = current_id, "source opened");
        Ok((reader, current_id, resume))
    }

    /// 유휴 상태에서 로테이션/절단/삭제 여부를 점검합니다.
    async fn check_source(&self, current_id: u64, offset: u64) -> SourceState {
        let path = &self.config.source_path;
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let id = PositionTracker::resolve_identity(path).await.unwrap_or(0);
                if id != current_id {
                    tracing::info!(old_id = current_id, new_id = id, "source file rotated");
                    SourceState::Reopen
                } else if meta.len() < offset {
                    tracing::warn!(len = meta.len(), offset, "source file truncated");
                    SourceState::Reopen
                } else {
                    SourceState::Unchanged
                }
            }
            Err(_) => {
                tracing::info!(source = %path.display(), "source file disappeared");
                SourceState::Missing
            }
        }
    }
}

/// 취소 가능한 sleep. 정상적으로 기다렸으면 `true`, 취소됐으면 `false`.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// tail 파이프라인 빌더
///
/// 설정을 검증하고 협력 객체를 조립합니다.
pub struct TailPipelineBuilder {
    config: IngestConfig,
}

impl TailPipelineBuilder {
    /// 기본 설정으로 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// 위치 북마크와 마스킹 매핑을 로드하므로 비동기입니다.
    pub async fn build(self) -> Result<TailPipeline, IngestError> {
        self.config.validate()?;

        let tracker = PositionTracker::load(
            &self.config.position_path,
            &self.config.source_path,
            self.config.persist_interval,
        )
        .await;
        let masker = MaskingEngine::new(&self.config.mask)?;
        let classifier = Classifier::new()?;
        let forwarder = Forwarder::new(&self.config.forward)?;
        let tap = RawTap::new(self.config.raw_tap_enable, &self.config.raw_tap_path);

        Ok(TailPipeline {
            config: self.config,
            tracker,
            masker,
            classifier,
            forwarder,
            tap,
            lines_read: 0,
            forwarded_count: 0,
            failure_count: 0,
        })
    }
}

impl Default for TailPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
