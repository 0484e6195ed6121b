//! 마스킹 매핑 영속화 -- 원문과 토큰의 대응표
//!
//! [`TokenMapping`]은 원문 -> 토큰 순방향 매핑과, 가역 모드에서는
//! 토큰 -> 원문 역방향 매핑을 함께 유지합니다. 새 매핑이 생길 때마다
//! JSON 파일로 저장하고 시작 시 다시 로드합니다.
//!
//! 저장 실패는 로그만 남기고 무시합니다. 토큰은 비밀키와 원문의 순수 함수이므로
//! 매핑 파일이 유실되어도 같은 원문은 다음에 같은 토큰으로 재유도됩니다.
//! 잃는 것은 선택적인 역방향 조회 항목뿐입니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// 매핑 파일의 디스크 형식: `{ "map": {...}, "rev": {...} }`
#[derive(Debug, Default, Deserialize)]
struct MappingFile {
    #[serde(default)]
    map: HashMap<String, String>,
    #[serde(default)]
    rev: HashMap<String, String>,
}

#[derive(Serialize)]
struct MappingFileRef<'a> {
    map: &'a HashMap<String, String>,
    rev: &'a HashMap<String, String>,
}

/// 원문 <-> 토큰 매핑 테이블
pub struct TokenMapping {
    /// 매핑 파일 경로
    path: PathBuf,
    /// 역방향 매핑 유지 여부
    reversible: bool,
    /// 원문 -> 토큰
    forward: HashMap<String, String>,
    /// 토큰 -> 원문 (가역 모드에서만 채워짐)
    reverse: HashMap<String, String>,
}

impl TokenMapping {
    /// 매핑 파일을 로드합니다.
    ///
    /// 파일이 없거나 손상된 경우 빈 매핑으로 시작합니다.
    pub fn load(path: impl Into<PathBuf>, reversible: bool) -> Self {
        let path = path.into();
        let file = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<MappingFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupt mask mapping file, starting empty"
                    );
                    MappingFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MappingFile::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "mask mapping file unreadable, starting empty"
                );
                MappingFile::default()
            }
        };

        Self {
            path,
            reversible,
            forward: file.map,
            reverse: file.rev,
        }
    }

    /// 원문에 대해 이미 발급된 토큰을 조회합니다.
    pub fn token_for_raw(&self, raw: &str) -> Option<&str> {
        self.forward.get(raw).map(String::as_str)
    }

    /// 토큰에서 원문을 복원합니다. 가역 모드가 아니면 항상 `None`입니다.
    pub fn unmask(&self, token: &str) -> Option<&str> {
        self.reverse.get(token).map(String::as_str)
    }

    /// 새 매핑을 추가하고 저장합니다.
    ///
    /// 저장 실패는 수집을 막지 않도록 로그만 남기고 무시합니다.
    pub fn insert(&mut self, raw: &str, token: &str) {
        self.forward.insert(raw.to_owned(), token.to_owned());
        if self.reversible {
            self.reverse.insert(token.to_owned(), raw.to_owned());
        }
        if let Err(e) = self.save() {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to persist mask mapping, continuing"
            );
        }
    }

    /// 현재 매핑 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// 매핑이 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// 매핑 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&MappingFileRef {
            map: &self.forward,
            rev: &self.reverse,
        })?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}
