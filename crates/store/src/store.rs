//! fingerprint 집계 저장소
//!
//! [`EventStore`]는 fingerprint를 공유하는 이벤트 레코드를 하나의
//! [`AggregateRecord`]로 합칩니다. 동시 유입 요청이 공유하는 자원이므로
//! 모든 변경은 단일 뮤텍스 아래에서 수행됩니다. 같은 fingerprint에 대한
//! 동시 upsert 경쟁이 갱신을 잃지 않습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use opstail_core::metrics::{STORE_AGGREGATES, STORE_EVICTIONS_TOTAL};
use opstail_core::record::EventRecord;

/// fingerprint 하나의 롤링 집계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// 조건 식별 키
    pub fingerprint: String,
    /// 수락된 발생 횟수
    pub count: u64,
    /// 최초 관측 시각
    pub first_seen: DateTime<Utc>,
    /// 최근 관측 시각 (`first_seen <= last_seen` 항상 성립)
    pub last_seen: DateTime<Utc>,
    /// 가장 최근에 관측된 대표 레코드 (표시용)
    pub representative: EventRecord,
}

impl AggregateRecord {
    fn new(record: EventRecord) -> Self {
        Self {
            fingerprint: record.fingerprint.clone(),
            count: 1,
            first_seen: record.timestamp,
            last_seen: record.timestamp,
            representative: record,
        }
    }
}

/// 저장소 내부 상태 -- 뮤텍스 아래에서만 접근
struct StoreInner {
    /// fingerprint -> 집계
    aggregates: HashMap<String, AggregateRecord>,
    /// fingerprint가 없는 레코드 (집계 우회, FIFO 보존)
    unaggregated: VecDeque<EventRecord>,
}

/// 수신측 이벤트 저장소
///
/// 프로세스 시작 시 한 번 생성되어 유입 핸들러에 참조로 전달되는
/// 명시적 상태 객체입니다.
pub struct EventStore {
    /// 유지할 최대 집계 수. 초과 시 last_seen이 가장 오래된 집계를 축출.
    capacity: usize,
    inner: Mutex<StoreInner>,
}

impl EventStore {
    /// 지정한 용량으로 저장소를 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner {
                aggregates: HashMap::new(),
                unaggregated: VecDeque::new(),
            }),
        }
    }

    /// 레코드를 집계에 반영하고 갱신된 집계를 반환합니다.
    ///
    /// - 처음 보는 fingerprint: count=1, first_seen=last_seen=timestamp로 생성
    /// - 알려진 fingerprint: count 증가, first_seen은 뒤로만, last_seen은
    ///   앞으로만 확장, 대표 레코드는 가장 최근 관측으로 교체
    /// - fingerprint가 비어있는 레코드: 집계를 우회하고 개별 보존
    pub fn upsert(&self, record: EventRecord) -> AggregateRecord {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let fingerprint = record.fingerprint.trim().to_owned();
        if fingerprint.is_empty() {
            if inner.unaggregated.len() >= self.capacity {
                inner.unaggregated.pop_front();
            }
            inner.unaggregated.push_back(record.clone());
            return AggregateRecord::new(record);
        }

        if let Some(aggregate) = inner.aggregates.get_mut(&fingerprint) {
            aggregate.count += 1;
            if record.timestamp < aggregate.first_seen {
                aggregate.first_seen = record.timestamp;
            }
            if record.timestamp >= aggregate.last_seen {
                aggregate.last_seen = record.timestamp;
                aggregate.representative = record;
            }
            return aggregate.clone();
        }

        if inner.aggregates.len() >= self.capacity {
            Self::evict_oldest(&mut inner);
        }

        let aggregate = AggregateRecord::new(record);
        inner
            .aggregates
            .insert(fingerprint, aggregate.clone());
        gauge!(STORE_AGGREGATES).set(inner.aggregates.len() as f64);
        aggregate
    }

    /// fingerprint로 집계를 조회합니다.
    pub fn get(&self, fingerprint: &str) -> Option<AggregateRecord> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.aggregates.get(fingerprint).cloned()
    }

    /// last_seen 내림차순으로 집계 목록을 반환합니다.
    pub fn list(&self, limit: usize) -> Vec<AggregateRecord> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut items: Vec<AggregateRecord> = inner.aggregates.values().cloned().collect();
        items.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        items.truncate(limit);
        items
    }

    /// fingerprint 없이 개별 보존된 레코드를 최신순으로 반환합니다.
    pub fn unaggregated(&self, limit: usize) -> Vec<EventRecord> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .unaggregated
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// 추적 중인 집계 수를 반환합니다.
    pub fn len(&self) -> usize {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.aggregates.len()
    }

    /// 집계가 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_oldest(inner: &mut StoreInner) {
        let oldest = inner
            .aggregates
            .iter()
            .min_by_key(|(_, aggregate)| aggregate.last_seen)
            .map(|(fingerprint, _)| fingerprint.clone());

        if let Some(fingerprint) = oldest {
            inner.aggregates.remove(&fingerprint);
            counter!(STORE_EVICTIONS_TOTAL).increment(1);
            tracing::warn!(
                fingerprint = fingerprint.as_str(),
                "store at capacity, evicted oldest aggregate"
            );
        }
    }
}
