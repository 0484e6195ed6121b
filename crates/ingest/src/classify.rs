//! 라인 분류기 -- 마스킹된 로그 라인을 이벤트 또는 증거로 판정
//!
//! [`Classifier`]는 순서 있는 패턴 규칙 집합을 유지하며, 가장 구체적인
//! 규칙부터 평가해 첫 매칭이 승리합니다. 어떤 규칙에도 매칭되지 않는 라인은
//! 버리지 않고 출처 추정 태그를 붙여 증거로 라우팅합니다.
//!
//! # Fingerprint 구성 규칙
//! 고정 규칙 식별자 + 조건 식별 필드만을 `|`로 연결합니다. 타임스탬프나
//! 카운터 등 실행마다 변하는 값은 절대 포함하지 않으므로, 같은 조건의
//! 반복 발생은 언제나 같은 fingerprint로 수렴합니다. 두 포트 사이를
//! 오가는 관계형 이벤트는 양쪽 식별자를 사전순 정렬해 보고 방향과
//! 무관하게 같은 조건으로 인식합니다.

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use opstail_core::record::{
    Classified, EventRecord, EvidenceFields, EvidenceRecord, RecordMeta,
};

use crate::error::IngestError;

/// 증거 다이제스트에 포함할 본문 최대 길이 (문자)
///
/// 본문 꼬리의 가변 부분(카운터, 세부 수치)이 다이제스트를 흔들지 않도록
/// 앞부분만 사용합니다.
const EVIDENCE_DIGEST_MSG_LEN: usize = 200;

/// 증거 다이제스트의 16진수 절단 길이
const EVIDENCE_DIGEST_LEN: usize = 16;

// --- 증거 출처 추정 힌트 ---

const FORTI_HINTS: &[&str] = &[
    "fortigate", "fg-", "utm", "traffic", "appid", "policyid", "vd=", "srcip=", "dstip=",
];
const AD_HINTS: &[&str] = &[
    "kerberos", "ntlm", "eventid", "4624", "4625", "4768", "4771", "ldap",
];
const VPN_HINTS: &[&str] = &["vpn", "ssl vpn", "ipsec", "ike", "tunnel", "login", "logout"];
const UEBA_HINTS: &[&str] = &["ueba", "risk", "behavior", "anomaly", "impossible travel"];

/// rsyslog 적재 라인에서 추출한 헤더 필드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// 장비 호스트명 (추출 실패 시 "unknown")
    pub host: String,
    /// 프로그램명
    pub program: String,
    /// 본문
    pub msg: String,
}

/// 이벤트 규칙의 매칭 의미
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    /// MAC 주소가 두 포트 사이를 오가는 플래핑
    MacFlapping,
    /// 인터페이스 링크 상태 변화
    LinkUpDown,
}

/// 단일 이벤트 패턴 규칙
struct EventRule {
    /// 규칙 이름 (로깅용)
    name: &'static str,
    /// 매칭 패턴
    pattern: Regex,
    /// 매칭 의미
    kind: RuleKind,
}

/// 라인 분류기
///
/// 규칙 패턴은 생성 시 한 번만 컴파일합니다.
pub struct Classifier {
    /// 헤더 패턴: `MMM DD HH:MM:SS REST`
    header_re: Regex,
    /// 순서 있는 이벤트 규칙 (구체적인 것 우선)
    rules: Vec<EventRule>,
}

impl Classifier {
    /// 기본 규칙 집합으로 분류기를 생성합니다.
    pub fn new() -> Result<Self, IngestError> {
        let header_re =
            Regex::new(r"^(?P<mon>\w{3})\s+(?P<day>\d{1,2})\s+(?P<hms>\d{2}:\d{2}:\d{2})\s+(?P<rest>.+)$")?;

        let rules = vec![
            EventRule {
                name: "mac_flapping",
                pattern: Regex::new(
                    r"(?i)MAC[_\s]?FLAPPING.*?MAC address\s+(?P<mac>[0-9a-fA-F\-\.]+)\s+has been moving between port\s+(?P<p1>\S+)\s+and\s+port\s+(?P<p2>\S+)",
                )?,
                kind: RuleKind::MacFlapping,
            },
            EventRule {
                name: "link_updown",
                pattern: Regex::new(
                    r"(?i)(?:LINK_UPDOWN).*?(?P<intf>(?:GigabitEthernet|Ten-GigabitEthernet|XGigabitEthernet|Bridge-Aggregation)\S+)\s+link\s+(?P<state>up|down)",
                )?,
                kind: RuleKind::LinkUpDown,
            },
        ];

        Ok(Self { header_re, rules })
    }

    /// rsyslog 적재 라인에서 host/program/msg를 추출합니다.
    ///
    /// 형식: `Dec 26 19:30:12 2025 SW01:  %%IFNET/5/LINK_UPDOWN: ...`
    /// 헤더가 기대 형식이 아니면 라인 전체를 본문으로 취급합니다.
    /// 타임스탬프는 파싱하지 않고 수집 시각을 사용합니다.
    pub fn parse_header(&self, line: &str) -> ParsedLine {
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(caps) = self.header_re.captures(line) else {
            return ParsedLine {
                host: "unknown".to_owned(),
                program: "rsyslog".to_owned(),
                msg: line.to_owned(),
            };
        };

        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or(line);

        // "... HOST:  MESSAGE" -- 첫 ": " 앞의 마지막 단어가 호스트
        if let Some((left, right)) = rest.split_once(": ") {
            let host = left
                .split_whitespace()
                .last()
                .unwrap_or("unknown")
                .to_owned();
            ParsedLine {
                host,
                program: "syslog".to_owned(),
                msg: right.trim().to_owned(),
            }
        } else {
            ParsedLine {
                host: "unknown".to_owned(),
                program: "syslog".to_owned(),
                msg: rest.to_owned(),
            }
        }
    }

    /// 마스킹된 라인을 이벤트 또는 증거로 분류합니다.
    ///
    /// 항상 마스킹이 끝난 host/msg를 입력해야 합니다. fingerprint와
    /// 제목이 마스킹된 값 기준으로 만들어져야 원문이 역추정되지 않습니다.
    pub fn classify(
        &self,
        host: &str,
        program: &str,
        msg: &str,
        timestamp: DateTime<Utc>,
        meta: RecordMeta,
    ) -> Classified {
        // 장비 셸 감사 라인은 이벤트로 승격하지 않음
        if !msg.contains("%%10SHELL/") {
            for rule in &self.rules {
                if let Some(caps) = rule.pattern.captures(msg) {
                    tracing::debug!(rule = rule.name, host, "event rule matched");
                    return self.build_event(rule.kind, &caps, host, program, msg, timestamp, meta);
                }
            }
        }

        let source = detect_source(host, msg);
        let digest_msg: String = msg.chars().take(EVIDENCE_DIGEST_MSG_LEN).collect();
        let fingerprint = stable_digest(&format!("{host}|{source}|{digest_msg}"));

        Classified::Evidence(EvidenceRecord {
            timestamp,
            host: host.to_owned(),
            source: source.to_owned(),
            message: msg.to_owned(),
            fields: EvidenceFields {
                program: program.to_owned(),
                masked: meta.masked,
                mask_stats: meta.mask_stats,
                fingerprint,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_event(
        &self,
        kind: RuleKind,
        caps: &regex::Captures<'_>,
        host: &str,
        program: &str,
        msg: &str,
        timestamp: DateTime<Utc>,
        meta: RecordMeta,
    ) -> Classified {
        let (category, title, fingerprint) = match kind {
            RuleKind::MacFlapping => {
                let mac = caps.name("mac").map(|m| m.as_str()).unwrap_or("unknown");
                let p1 = caps.name("p1").map(|m| m.as_str()).unwrap_or("unknown");
                let p2 = caps.name("p2").map(|m| m.as_str()).unwrap_or("unknown");
                // 보고 방향과 무관하게 같은 조건이 되도록 포트를 정렬
                let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
                (
                    "L2/MAC_FLAPPING".to_owned(),
                    format!("MAC_FLAPPING {mac} {p1}<->{p2}"),
                    format!("syslog|MAC_FLAPPING|{mac}|{lo}|{hi}"),
                )
            }
            RuleKind::LinkUpDown => {
                let intf = caps.name("intf").map(|m| m.as_str()).unwrap_or("unknown");
                let state = caps
                    .name("state")
                    .map(|m| m.as_str().to_lowercase())
                    .unwrap_or_else(|| "unknown".to_owned());
                (
                    "SWITCH_LINK".to_owned(),
                    format!("{host} {intf} link {state}"),
                    format!("h3c|{host}|{intf}|link_{state}"),
                )
            }
        };

        Classified::Event(EventRecord {
            timestamp,
            host: host.to_owned(),
            program: program.to_owned(),
            msg: msg.to_owned(),
            category,
            title,
            fingerprint,
            meta,
        })
    }
}

/// 호스트명과 본문의 힌트 키워드로 증거 출처를 추정합니다.
fn detect_source(host: &str, msg: &str) -> &'static str {
    let h = host.to_lowercase();
    let m = msg.to_lowercase();

    if ["forti", "fg", "fortigate"].iter().any(|x| h.contains(x))
        || FORTI_HINTS.iter().any(|x| m.contains(x))
    {
        return "fortigate";
    }
    if ["ad", "dc", "domain"].iter().any(|x| h.contains(x))
        || AD_HINTS.iter().any(|x| m.contains(x))
    {
        return "ad";
    }
    if ["vpn", "ssl", "ipsec"].iter().any(|x| h.contains(x))
        || VPN_HINTS.iter().any(|x| m.contains(x))
    {
        return "vpn";
    }
    if ["ueba", "behavior"].iter().any(|x| h.contains(x))
        || UEBA_HINTS.iter().any(|x| m.contains(x))
    {
        return "ueba";
    }
    "syslog"
}

/// 입력 문자열의 SHA-256 앞 16자리 16진수를 반환합니다.
fn stable_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex_str = hex::encode(digest);
    hex_str.truncate(EVIDENCE_DIGEST_LEN);
    hex_str
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new().unwrap()
    }

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        rfc3339.parse().unwrap()
    }

    fn classify_line(c: &Classifier, line: &str, when: &str) -> Classified {
        let parsed = c.parse_header(line);
        c.classify(
            &parsed.host,
            &parsed.program,
            &parsed.msg,
            ts(when),
            RecordMeta::default(),
        )
    }

    // === 헤더 파싱 ===

    #[test]
    fn parse_header_extracts_host_and_msg() {
        let c = classifier();
        let parsed = c.parse_header(
            "Dec 26 19:30:12 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.",
        );
        assert_eq!(parsed.host, "SW01");
        assert_eq!(parsed.program, "syslog");
        assert_eq!(
            parsed.msg,
            "%%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down."
        );
    }

    #[test]
    fn parse_header_unexpected_shape_is_whole_message() {
        let c = classifier();
        let parsed = c.parse_header("completely free-form text\n");
        assert_eq!(parsed.host, "unknown");
        assert_eq!(parsed.program, "rsyslog");
        assert_eq!(parsed.msg, "completely free-form text");
    }

    #[test]
    fn parse_header_without_colon_keeps_rest_as_msg() {
        let c = classifier();
        let parsed = c.parse_header("Dec 26 19:30:12 something without colon separator");
        assert_eq!(parsed.host, "unknown");
        assert_eq!(parsed.msg, "something without colon separator");
    }

    // === 링크 이벤트 ===

    #[test]
    fn link_down_line_becomes_switch_link_event() {
        let c = classifier();
        let result = classify_line(
            &c,
            "Dec 26 19:30:12 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.",
            "2025-12-26T19:30:12Z",
        );

        let Classified::Event(event) = result else {
            panic!("expected event");
        };
        assert_eq!(event.category, "SWITCH_LINK");
        assert_eq!(event.title, "SW01 GigabitEthernet1/0/1 link down");
        assert_eq!(event.fingerprint, "h3c|SW01|GigabitEthernet1/0/1|link_down");
    }

    #[test]
    fn same_condition_at_different_times_has_same_fingerprint() {
        let c = classifier();
        let line = "Dec 26 10:00:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.";
        let later = "Dec 26 10:05:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.";

        let first = classify_line(&c, line, "2025-12-26T10:00:00Z");
        let second = classify_line(&c, later, "2025-12-26T10:05:00Z");

        let (Classified::Event(a), Classified::Event(b)) = (first, second) else {
            panic!("expected events");
        };
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.timestamp, b.timestamp);
    }

    #[test]
    fn different_interface_has_different_fingerprint() {
        let c = classifier();
        let a = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.",
            "2025-12-26T10:00:00Z",
        );
        let b = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/2 link down.",
            "2025-12-26T10:00:00Z",
        );

        let (Classified::Event(a), Classified::Event(b)) = (a, b) else {
            panic!("expected events");
        };
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn link_up_and_down_are_different_conditions() {
        let c = classifier();
        let down = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.",
            "2025-12-26T10:00:00Z",
        );
        let up = classify_line(
            &c,
            "Dec 26 10:01:00 2025 SW01:  %%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link up.",
            "2025-12-26T10:01:00Z",
        );

        let (Classified::Event(down), Classified::Event(up)) = (down, up) else {
            panic!("expected events");
        };
        assert_eq!(down.fingerprint, "h3c|SW01|GigabitEthernet1/0/1|link_down");
        assert_eq!(up.fingerprint, "h3c|SW01|GigabitEthernet1/0/1|link_up");
    }

    // === MAC 플래핑 이벤트 ===

    #[test]
    fn mac_flapping_fingerprint_is_order_invariant() {
        let c = classifier();
        let forward = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW02: %%MAC_FLAPPING: MAC address 5489-98b3-2111 has been moving between port Gi1/0/48 and port Gi2/0/48",
            "2025-12-26T10:00:00Z",
        );
        let reversed = classify_line(
            &c,
            "Dec 26 10:00:30 2025 SW02: %%MAC_FLAPPING: MAC address 5489-98b3-2111 has been moving between port Gi2/0/48 and port Gi1/0/48",
            "2025-12-26T10:00:30Z",
        );

        let (Classified::Event(a), Classified::Event(b)) = (forward, reversed) else {
            panic!("expected events");
        };
        assert_eq!(a.category, "L2/MAC_FLAPPING");
        assert_eq!(
            a.fingerprint,
            "syslog|MAC_FLAPPING|5489-98b3-2111|Gi1/0/48|Gi2/0/48"
        );
        assert_eq!(a.fingerprint, b.fingerprint);
        // 제목은 보고 방향을 보존
        assert_eq!(a.title, "MAC_FLAPPING 5489-98b3-2111 Gi1/0/48<->Gi2/0/48");
        assert_eq!(b.title, "MAC_FLAPPING 5489-98b3-2111 Gi2/0/48<->Gi1/0/48");
    }

    #[test]
    fn different_mac_has_different_fingerprint() {
        let c = classifier();
        let a = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW02: MAC_FLAPPING: MAC address 5489-98b3-2111 has been moving between port Gi1/0/48 and port Gi2/0/48",
            "2025-12-26T10:00:00Z",
        );
        let b = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW02: MAC_FLAPPING: MAC address 5489-98b3-2222 has been moving between port Gi1/0/48 and port Gi2/0/48",
            "2025-12-26T10:00:00Z",
        );

        let (Classified::Event(a), Classified::Event(b)) = (a, b) else {
            panic!("expected events");
        };
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    // === 증거 라우팅 ===

    #[test]
    fn shell_audit_line_is_demoted_to_evidence() {
        let c = classifier();
        let result = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW01: %%10SHELL/6/SHELL_CMD: display interface brief",
            "2025-12-26T10:00:00Z",
        );
        assert!(!result.is_event());
    }

    #[test]
    fn unmatched_line_becomes_evidence_with_digest() {
        let c = classifier();
        let result = classify_line(
            &c,
            "Dec 26 10:00:00 2025 SW01: %%SOMETHING/4/UNKNOWN: strange condition",
            "2025-12-26T10:00:00Z",
        );

        let Classified::Evidence(evidence) = result else {
            panic!("expected evidence");
        };
        assert_eq!(evidence.source, "syslog");
        assert_eq!(evidence.fields.program, "syslog");
        assert_eq!(evidence.fields.fingerprint.len(), EVIDENCE_DIGEST_LEN);
    }

    #[test]
    fn evidence_digest_ignores_volatile_tail() {
        let c = classifier();
        let prefix = "x".repeat(EVIDENCE_DIGEST_MSG_LEN);
        let a = c.classify(
            "host",
            "syslog",
            &format!("{prefix} counter=1"),
            ts("2025-12-26T10:00:00Z"),
            RecordMeta::default(),
        );
        let b = c.classify(
            "host",
            "syslog",
            &format!("{prefix} counter=2"),
            ts("2025-12-26T10:00:01Z"),
            RecordMeta::default(),
        );

        let (Classified::Evidence(a), Classified::Evidence(b)) = (a, b) else {
            panic!("expected evidence");
        };
        assert_eq!(a.fields.fingerprint, b.fields.fingerprint);
    }

    #[test]
    fn source_detection_heuristics() {
        assert_eq!(detect_source("fw-edge", "policyid=7 srcip=1.2.3.4"), "fortigate");
        assert_eq!(detect_source("dc01", "kerberos ticket request 4768"), "ad");
        assert_eq!(detect_source("gw", "ipsec tunnel established"), "vpn");
        assert_eq!(detect_source("analytics", "impossible travel detected"), "ueba");
        assert_eq!(detect_source("SW01", "interface flap recovered"), "syslog");
    }

    #[test]
    fn event_carries_mask_meta() {
        let c = classifier();
        let mut stats = opstail_core::record::MaskStats::new();
        stats.insert("IP".to_owned(), 1);
        let meta = RecordMeta {
            masked: true,
            mask_stats: stats,
        };

        let result = c.classify(
            "SW01",
            "syslog",
            "%%IFNET/5/LINK_UPDOWN: GigabitEthernet1/0/1 link down.",
            ts("2025-12-26T10:00:00Z"),
            meta,
        );

        let Classified::Event(event) = result else {
            panic!("expected event");
        };
        assert!(event.meta.masked);
        assert_eq!(event.meta.mask_stats.get("IP"), Some(&1));
    }

    #[test]
    fn stable_digest_is_deterministic() {
        assert_eq!(stable_digest("a|b|c"), stable_digest("a|b|c"));
        assert_ne!(stable_digest("a|b|c"), stable_digest("a|b|d"));
    }
}
