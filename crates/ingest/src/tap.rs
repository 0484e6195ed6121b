//! 원본 평문 로컬 사본 (raw tap)
//!
//! 감사 목적의 선택 기능으로, 마스킹 전 원본 라인을 로컬 전용 파일에
//! 덧붙입니다. 이 파일의 내용은 절대 전송되지 않으며, Unix에서는 소유자만
//! 읽을 수 있도록 0600 권한으로 생성됩니다.
//!
//! 기록은 최선 노력입니다. 실패해도 수집을 막지 않습니다.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

/// 원본 평문 사본 기록기
pub struct RawTap {
    /// 활성화 여부
    enabled: bool,
    /// 사본 파일 경로
    path: PathBuf,
}

impl RawTap {
    /// 새 raw tap을 생성합니다. 비활성화 상태면 모든 기록이 no-op입니다.
    pub fn new(enabled: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            path: path.into(),
        }
    }

    /// 활성화 여부를 반환합니다.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 라인을 사본 파일에 덧붙입니다 (최선 노력).
    pub async fn append(&self, line: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.try_append(line).await {
            tracing::debug!(
                path = %self.path.display(),
                error = %e,
                "raw tap write failed, ignoring"
            );
        }
    }

    async fn try_append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }
}
