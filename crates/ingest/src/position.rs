//! 위치 북마크 -- 소스 파일 소비 위치의 내구성 있는 추적
//!
//! [`PositionTracker`]는 파일 식별자(inode)와 바이트 오프셋으로 소비 위치를
//! 기록하여, 재시작 시 같은 라인을 건너뛰거나 다시 읽지 않고 이어서 읽습니다.
//!
//! # 로테이션/절단 처리
//! - inode 변경 감지 (logrotate 등): 정책에 따라 새 파일의 끝 또는 처음에서 재개
//! - 파일 크기 축소 감지 (truncation): 오프셋을 0으로 재설정
//!
//! # 내구성 규율
//! `advance`는 파생 레코드의 전달이 성공한 뒤에만 호출됩니다. 영속화는
//! `persist_interval`로 스로틀되므로, 크래시 시 마지막 저장 이후의 라인이
//! 재전송될 수 있습니다. 이 한정된 중복 전송은 수신측의 fingerprint 집계가
//! 멱등적으로 흡수합니다.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use opstail_core::metrics::INGEST_POSITION_PERSISTS_TOTAL;

use crate::config::RotatePolicy;
use crate::error::IngestError;

/// 소스 파일 내 소비 위치
///
/// 북마크 파일에 JSON으로 영속화되는 단위입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailPosition {
    /// 소스 파일 경로
    pub path: PathBuf,
    /// 파일 식별자 (Unix inode, 0 = 미확인)
    #[serde(rename = "fileIdentity")]
    pub file_id: u64,
    /// 소비 완료된 바이트 오프셋
    pub offset: u64,
    /// 마지막 갱신 시각
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl TailPosition {
    /// 아무것도 소비하지 않은 초기 위치를 생성합니다.
    pub fn zero(source_path: impl Into<PathBuf>) -> Self {
        Self {
            path: source_path.into(),
            file_id: 0,
            offset: 0,
            updated_at: Utc::now(),
        }
    }
}

/// 위치 추적기
///
/// 단일 수집 프로세스가 배타적으로 소유하며, 잠금 규율이 필요 없습니다.
pub struct PositionTracker {
    /// 북마크 파일 경로
    state_path: PathBuf,
    /// 현재 위치
    position: TailPosition,
    /// 영속화 최소 간격
    persist_interval: Duration,
    /// 마지막 영속화 시각
    last_persist: Option<Instant>,
    /// 영속화되지 않은 변경 존재 여부
    dirty: bool,
}

impl PositionTracker {
    /// 북마크 파일에서 마지막 위치를 읽습니다.
    ///
    /// 파일이 없거나 손상된 경우 초기 위치를 반환하며 에러를 내지 않습니다.
    /// 수집은 북마크 상태와 무관하게 항상 시작할 수 있어야 합니다.
    pub async fn load(
        state_path: impl Into<PathBuf>,
        source_path: impl AsRef<Path>,
        persist_interval: Duration,
    ) -> Self {
        let state_path = state_path.into();
        let source_path = source_path.as_ref();

        let position = match tokio::fs::read_to_string(&state_path).await {
            Ok(content) => match serde_json::from_str::<TailPosition>(&content) {
                Ok(pos) => {
                    tracing::info!(
                        offset = pos.offset,
                        file_id = pos.file_id,
                        "loaded tail position bookmark"
                    );
                    pos
                }
                Err(e) => {
                    tracing::warn!(
                        path = %state_path.display(),
                        error = %e,
                        "corrupt position bookmark, starting from zero"
                    );
                    TailPosition::zero(source_path)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                TailPosition::zero(source_path)
            }
            Err(e) => {
                tracing::warn!(
                    path = %state_path.display(),
                    error = %e,
                    "position bookmark unreadable, starting from zero"
                );
                TailPosition::zero(source_path)
            }
        };

        Self {
            state_path,
            position,
            persist_interval,
            last_persist: None,
            dirty: false,
        }
    }

    /// 현재 위치를 반환합니다.
    pub fn position(&self) -> &TailPosition {
        &self.position
    }

    /// 현재 오프셋을 반환합니다.
    pub fn offset(&self) -> u64 {
        self.position.offset
    }

    /// 추적 중인 파일 식별자를 반환합니다.
    pub fn file_id(&self) -> u64 {
        self.position.file_id
    }

    /// 경로의 현재 파일 식별자(inode)를 얻습니다.
    #[cfg(unix)]
    pub async fn resolve_identity(path: impl AsRef<Path>) -> std::io::Result<u64> {
        use std::os::unix::fs::MetadataExt;
        let meta = tokio::fs::metadata(path).await?;
        Ok(meta.ino())
    }

    /// 경로의 현재 파일 식별자를 얻습니다. (비 Unix: 식별자 없음)
    #[cfg(not(unix))]
    pub async fn resolve_identity(path: impl AsRef<Path>) -> std::io::Result<u64> {
        tokio::fs::metadata(path).await.map(|_| 0)
    }

    /// 파일 (재)오픈 시 저장된 위치를 실제 파일 상태와 대조합니다.
    ///
    /// - 저장된 식별자가 현재와 다르면 로테이션으로 간주하고 정책에 따라
    ///   오프셋을 재설정합니다.
    /// - 저장된 오프셋이 파일 크기를 넘으면 절단으로 간주하고 0으로
    ///   재설정합니다.
    /// - 저장 상태가 전혀 없는 첫 기동은 파일 끝에서 시작합니다
    ///   (과거 로그 전체 재수집 방지).
    ///
    /// 반환값은 파일을 seek해야 할 오프셋입니다.
    pub fn reconcile(&mut self, current_id: u64, file_len: u64, policy: RotatePolicy) -> u64 {
        let fresh = self.position.file_id == 0 && self.position.offset == 0;

        if self.position.file_id != 0 && self.position.file_id != current_id {
            let resume = match policy {
                RotatePolicy::End => file_len,
                RotatePolicy::Start => 0,
            };
            tracing::info!(
                old_id = self.position.file_id,
                new_id = current_id,
                resume,
                "file identity changed (rotation), resetting offset"
            );
            counter!(opstail_core::metrics::INGEST_ROTATIONS_TOTAL).increment(1);
            self.position.offset = resume;
        }

        self.position.file_id = current_id;

        if self.position.offset > file_len {
            tracing::warn!(
                offset = self.position.offset,
                file_len,
                "stored offset beyond file size (truncation), resetting to zero"
            );
            self.position.offset = 0;
        }

        if fresh {
            self.position.offset = file_len;
            tracing::info!(offset = file_len, "no previous bookmark, starting at end of file");
        }

        self.position.updated_at = Utc::now();
        self.dirty = true;
        self.position.offset
    }

    /// 소비 위치를 전진시킵니다.
    ///
    /// 파생 레코드가 수집 서버에 전달된 뒤에만 호출해야 합니다.
    /// 전달 실패 시 호출하지 않으면 해당 라인은 다음 시도에서 재전송됩니다.
    pub fn advance(&mut self, new_offset: u64) {
        self.position.offset = new_offset;
        self.position.updated_at = Utc::now();
        self.dirty = true;
    }

    /// 스로틀 간격이 지났을 때만 위치를 영속화합니다.
    ///
    /// 영속화가 수행되면 `true`를 반환합니다.
    pub async fn maybe_persist(&mut self) -> Result<bool, IngestError> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(last) = self.last_persist
            && last.elapsed() < self.persist_interval
        {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// 위치를 북마크 파일에 기록합니다.
    ///
    /// 임시 파일에 쓴 뒤 rename하는 atomic replace를 사용하므로
    /// 기록 도중 크래시가 나도 기존 북마크는 손상되지 않습니다.
    pub async fn persist(&mut self) -> Result<(), IngestError> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&self.position)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &self.state_path).await?;

        self.last_persist = Some(Instant::now());
        self.dirty = false;
        counter!(INGEST_POSITION_PERSISTS_TOTAL).increment(1);
        tracing::debug!(offset = self.position.offset, "persisted tail position");
        Ok(())
    }
}
