//! 마스킹 엔진 -- 민감 토큰의 결정적 가명화
//!
//! 로그 라인이 호스트를 떠나기 전에 IPv4 주소, MAC 주소,
//! `password=`/`token=`/`secret=` 형태의 자격증명 값을 안정적인 가명 토큰으로
//! 치환합니다. 토큰은 비밀키로 키잉된 HMAC-SHA256의 절단 16진수이므로
//! 같은 원문은 언제나 같은 토큰이 되고, 서로 다른 원문은 압도적 확률로
//! 서로 다른 토큰이 됩니다.
//!
//! # 토큰 형식
//! ```text
//! <IP:3f2a9c01d4>   <MAC:b07e55c219>   <SECRET:91ee04af3c>
//! ```
//!
//! 마스킹은 수집을 절대 막지 않습니다. 매핑 저장 실패는 로그만 남기며,
//! 결정적 해시 덕분에 매핑 유실이 토큰 안정성을 깨뜨리지 않습니다.

pub mod mapping;

pub use mapping::TokenMapping;

use std::net::Ipv4Addr;

use hmac::{Hmac, Mac};
use metrics::counter;
use regex::Regex;
use sha2::Sha256;

use opstail_core::metrics::{INGEST_MASK_TOKENS_TOTAL, LABEL_TOKEN_KIND};
use opstail_core::record::MaskStats;

use opstail_core::config::MaskConfig;

use crate::error::IngestError;

/// 토큰 해시의 16진수 절단 길이
const TOKEN_HASH_LEN: usize = 10;

/// 권장 최소 비밀키 길이 (바이트)
const MIN_SECRET_LEN: usize = 12;

/// 마스킹 대상 토큰 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// IPv4 주소
    Ip,
    /// MAC 주소
    Mac,
    /// 자격증명성 key=value 값
    Secret,
}

impl TokenKind {
    /// 토큰과 통계에 사용되는 종류 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Ip => "IP",
            TokenKind::Mac => "MAC",
            TokenKind::Secret => "SECRET",
        }
    }
}

/// 마스킹 엔진
///
/// 명시적으로 주입되는 상태 객체이며 프로세스 시작 시 한 번 생성됩니다.
/// 단일 수집 태스크가 배타적으로 소유하므로 잠금이 필요 없습니다.
pub struct MaskingEngine {
    /// 마스킹 활성화 여부
    enabled: bool,
    /// 토큰 유도용 비밀키
    secret: Vec<u8>,
    /// 사설/루프백 IPv4 마스킹 제외 여부
    keep_private_ranges: bool,
    /// IPv4 패턴
    ip_re: Regex,
    /// MAC 패턴 (콜론/대시 구분 6그룹)
    mac_re: Regex,
    /// 자격증명 key=value 패턴 목록
    secret_res: Vec<Regex>,
    /// 원문 <-> 토큰 매핑
    mapping: TokenMapping,
}

impl MaskingEngine {
    /// 설정으로부터 마스킹 엔진을 생성합니다.
    pub fn new(config: &MaskConfig) -> Result<Self, IngestError> {
        if config.enabled && config.secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "mask secret missing or shorter than {} bytes; tokens will not be stable \
                 across deployments until a proper secret is configured",
                MIN_SECRET_LEN
            );
        }

        let ip_re = Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b")?;
        let mac_re = Regex::new(r"\b(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b")?;
        let secret_res = vec![
            Regex::new(r"(?i)(password\s*=\s*)(\S+)")?,
            Regex::new(r"(?i)(token\s*=\s*)(\S+)")?,
            Regex::new(r"(?i)(secret\s*=\s*)(\S+)")?,
        ];

        Ok(Self {
            enabled: config.enabled,
            secret: config.secret.as_bytes().to_vec(),
            keep_private_ranges: config.keep_private_ranges,
            ip_re,
            mac_re,
            secret_res,
            mapping: TokenMapping::load(&config.mapping_path, config.reversible),
        })
    }

    /// 마스킹 활성화 여부를 반환합니다.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 현재 매핑 수를 반환합니다.
    pub fn mapping_len(&self) -> usize {
        self.mapping.len()
    }

    /// 텍스트의 민감 토큰을 치환합니다.
    ///
    /// IPv4 -> MAC -> 자격증명 순으로 적용하며, 종류별 치환 횟수를
    /// 함께 반환합니다. 비활성화 상태면 입력을 그대로 반환합니다.
    pub fn scrub(&mut self, text: &str) -> (String, MaskStats) {
        let mut stats = MaskStats::new();
        if !self.enabled {
            return (text.to_owned(), stats);
        }

        let masked = self.mask_ips(text, &mut stats);
        let masked = self.mask_macs(&masked, &mut stats);
        let masked = self.mask_secrets(&masked, &mut stats);
        (masked, stats)
    }

    /// 원문에 대한 가명 토큰을 반환합니다.
    ///
    /// 이미 매핑된 원문은 기존 토큰을 그대로 반환하고(멱등),
    /// 처음 보는 원문은 새 토큰을 만들어 매핑에 영속화합니다.
    pub fn token_for(&mut self, raw: &str, kind: TokenKind) -> String {
        if let Some(token) = self.mapping.token_for_raw(raw) {
            return token.to_owned();
        }

        let token = format!(
            "<{}:{}>",
            kind.as_str(),
            keyed_hash(&self.secret, raw)
        );
        counter!(INGEST_MASK_TOKENS_TOTAL, LABEL_TOKEN_KIND => kind.as_str()).increment(1);
        self.mapping.insert(raw, &token);
        token
    }

    /// 토큰에서 원문을 복원합니다. 가역 모드가 아니면 항상 `None`입니다.
    pub fn unmask(&self, token: &str) -> Option<&str> {
        self.mapping.unmask(token)
    }

    fn mask_ips(&mut self, text: &str, stats: &mut MaskStats) -> String {
        let found: Vec<(usize, usize, String)> = self
            .ip_re
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str().to_owned()))
            .collect();
        if found.is_empty() {
            return text.to_owned();
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end, raw) in found {
            out.push_str(&text[last..start]);
            if self.keep_private_ranges && is_private_ipv4(&raw) {
                out.push_str(&raw);
            } else {
                let token = self.token_for(&raw, TokenKind::Ip);
                out.push_str(&token);
                *stats.entry(TokenKind::Ip.as_str().to_owned()).or_insert(0) += 1;
            }
            last = end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn mask_macs(&mut self, text: &str, stats: &mut MaskStats) -> String {
        let found: Vec<(usize, usize, String)> = self
            .mac_re
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str().to_owned()))
            .collect();
        if found.is_empty() {
            return text.to_owned();
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end, raw) in found {
            out.push_str(&text[last..start]);
            let token = self.token_for(&raw, TokenKind::Mac);
            out.push_str(&token);
            *stats.entry(TokenKind::Mac.as_str().to_owned()).or_insert(0) += 1;
            last = end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn mask_secrets(&mut self, text: &str, stats: &mut MaskStats) -> String {
        let mut current = text.to_owned();
        for idx in 0..self.secret_res.len() {
            // (전체 시작, 전체 끝, "key=" 접두, 값) 목록을 먼저 수집해
            // 정규식 빌림과 매핑 갱신을 분리합니다.
            let found: Vec<(usize, usize, String, String)> = self.secret_res[idx]
                .captures_iter(&current)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let prefix = caps.get(1)?;
                    let value = caps.get(2)?;
                    Some((
                        whole.start(),
                        whole.end(),
                        prefix.as_str().to_owned(),
                        value.as_str().to_owned(),
                    ))
                })
                .collect();
            if found.is_empty() {
                continue;
            }

            let mut out = String::with_capacity(current.len());
            let mut last = 0;
            for (start, end, prefix, value) in found {
                out.push_str(&current[last..start]);
                out.push_str(&prefix);
                let token = self.token_for(&value, TokenKind::Secret);
                out.push_str(&token);
                *stats
                    .entry(TokenKind::Secret.as_str().to_owned())
                    .or_insert(0) += 1;
                last = end;
            }
            out.push_str(&current[last..]);
            current = out;
        }
        current
    }
}

/// 비밀키로 키잉된 HMAC-SHA256의 앞 10자리 16진수를 반환합니다.
///
/// 비밀키와 원문의 순수 함수이므로 프로세스 재시작이나 매핑 유실과
/// 무관하게 같은 입력은 같은 출력을 냅니다.
fn keyed_hash(secret: &[u8], raw: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .expect("HMAC accepts keys of any length");
    mac.update(raw.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut hex_str = hex::encode(digest);
    hex_str.truncate(TOKEN_HASH_LEN);
    hex_str
}

/// RFC1918 사설 대역 또는 루프백 IPv4인지 확인합니다.
fn is_private_ipv4(raw: &str) -> bool {
    raw.parse::<Ipv4Addr>()
        .map(|ip| ip.is_private() || ip.is_loopback())
        .unwrap_or(false)
}
