//! 프레임 조립기 (수신측)
//!
//! - 순서가 뒤바뀐/중복된 프래그먼트 허용
//! - 여러 프레임 동시 조립 (서로 블로킹하지 않음)
//! - 마지막 프래그먼트 길이로 실제 프레임 크기 검출
//! - 개수/시간 기반 축출로 메모리 상한 유지
//!
//! 단일 스레드 자료구조이며 수신 루프가 독점 소유한다.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::ReassemblyConfig;
use crate::header::{FragmentHeader, FrameId};
use crate::max_frame_size;
use crate::stats::ReassemblyStats;

/// 조립 완료된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: FrameId,
    pub data: Bytes,
}

/// 프래그먼트 거부 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 페이로드가 max_payload보다 큼
    PayloadTooLarge,
    /// 축출 후에도 테이블이 가득 참
    TableFull,
    /// total_frags == 0
    EmptyFrame,
    /// total_frags * max_payload가 허용 크기 초과
    FrameTooLarge,
    /// 버퍼 할당 실패
    AllocationFailed,
    /// frag_index >= total_frags
    IndexOutOfRange,
}

/// `add_fragment` 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// 마지막 조각이 도착해 프레임 완성
    Complete(CompletedFrame),
    /// 받아들였지만 아직 미완성
    Pending,
    /// 이미 받은 인덱스 (무시됨)
    Duplicate,
    /// 거부됨 (프레임은 사실상 손실)
    Rejected(RejectReason),
}

impl FragmentOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn into_frame(self) -> Option<CompletedFrame> {
        match self {
            Self::Complete(frame) => Some(frame),
            _ => None,
        }
    }
}

/// 조립 중인 프레임
struct PendingFrame {
    /// total_frags * max_payload 크기로 미리 할당된 버퍼
    buffer: Vec<u8>,

    /// 수신된 프래그먼트 비트맵
    received: Vec<bool>,

    /// 수신된 프래그먼트 수
    received_count: u32,

    /// 첫 프래그먼트가 선언한 총 수 (이후 변경 불가)
    total_frags: u32,

    /// 실제 프레임 크기 (마지막 프래그먼트 도착 전에는 상한값)
    final_size: usize,

    /// 삽입 순서 (용량 축출용)
    sequence: u64,

    created_at: Instant,
    last_update: Instant,
}

impl PendingFrame {
    fn allocate(
        header: &FragmentHeader,
        config: &ReassemblyConfig,
        sequence: u64,
        now: Instant,
    ) -> Result<Self, RejectReason> {
        if header.total_frags == 0 {
            return Err(RejectReason::EmptyFrame);
        }

        let size = header.total_frags as u64 * config.max_payload as u64;
        if size > max_frame_size(config.max_payload) || size > config.max_frame_size {
            return Err(RejectReason::FrameTooLarge);
        }
        let size = usize::try_from(size).map_err(|_| RejectReason::FrameTooLarge)?;
        let total = header.total_frags as usize;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| RejectReason::AllocationFailed)?;
        buffer.resize(size, 0);

        let mut received = Vec::new();
        received
            .try_reserve_exact(total)
            .map_err(|_| RejectReason::AllocationFailed)?;
        received.resize(total, false);

        Ok(Self {
            buffer,
            received,
            received_count: 0,
            total_frags: header.total_frags,
            final_size: size,
            sequence,
            created_at: now,
            last_update: now,
        })
    }

    fn is_complete(&self) -> bool {
        self.received_count == self.total_frags
    }

    /// 수신률 계산
    fn receive_ratio(&self) -> f64 {
        self.received_count as f64 / self.total_frags as f64
    }

    fn into_data(mut self) -> Bytes {
        self.buffer.truncate(self.final_size);
        Bytes::from(self.buffer)
    }
}

/// 프레임 조립기
pub struct Reassembler {
    config: ReassemblyConfig,
    pending: HashMap<FrameId, PendingFrame>,
    next_sequence: u64,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            pending: HashMap::with_capacity(config.max_pending_frames),
            config,
            next_sequence: 0,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    /// 프래그먼트 추가
    pub fn add_fragment(&mut self, header: FragmentHeader, payload: &[u8]) -> FragmentOutcome {
        self.add_fragment_at(header, payload, Instant::now())
    }

    /// 프래그먼트 추가 (시각 지정)
    pub fn add_fragment_at(
        &mut self,
        header: FragmentHeader,
        payload: &[u8],
        now: Instant,
    ) -> FragmentOutcome {
        let outcome = self.insert(header, payload, now);

        match &outcome {
            FragmentOutcome::Complete(frame) => {
                self.stats.fragments_accepted += 1;
                self.stats.frames_completed += 1;
                self.stats.bytes_completed += frame.data.len() as u64;
            }
            FragmentOutcome::Pending => self.stats.fragments_accepted += 1,
            FragmentOutcome::Duplicate => self.stats.duplicates += 1,
            FragmentOutcome::Rejected(reason) => {
                self.stats.rejected += 1;
                trace!(
                    "프래그먼트 거부: frame_id={}, index={}/{}, reason={:?}",
                    header.frame_id,
                    header.frag_index,
                    header.total_frags,
                    reason
                );
            }
        }

        outcome
    }

    fn insert(&mut self, header: FragmentHeader, payload: &[u8], now: Instant) -> FragmentOutcome {
        let max_payload = self.config.max_payload;
        if payload.len() > max_payload {
            return FragmentOutcome::Rejected(RejectReason::PayloadTooLarge);
        }

        let frame_id = header.frame_id;
        if !self.pending.contains_key(&frame_id) {
            if self.pending.len() >= self.config.max_pending_frames {
                self.make_room(now);
                if self.pending.len() >= self.config.max_pending_frames {
                    return FragmentOutcome::Rejected(RejectReason::TableFull);
                }
            }

            match PendingFrame::allocate(&header, &self.config, self.next_sequence, now) {
                Ok(frame) => {
                    self.next_sequence += 1;
                    self.pending.insert(frame_id, frame);
                    self.stats.pending_high_water =
                        self.stats.pending_high_water.max(self.pending.len());
                }
                Err(reason) => return FragmentOutcome::Rejected(reason),
            }
        }

        let Some(frame) = self.pending.get_mut(&frame_id) else {
            return FragmentOutcome::Rejected(RejectReason::TableFull);
        };
        frame.last_update = now;

        let index = header.frag_index as usize;
        if header.frag_index >= frame.total_frags {
            return FragmentOutcome::Rejected(RejectReason::IndexOutOfRange);
        }
        if frame.received[index] {
            return FragmentOutcome::Duplicate;
        }

        let offset = index * max_payload;
        let end = offset + payload.len();
        if end <= frame.buffer.len() {
            frame.buffer[offset..end].copy_from_slice(payload);
        }

        // 마지막 조각만 max_payload보다 짧을 수 있으므로 여기서 실제 크기가 확정됨
        if header.frag_index == frame.total_frags - 1 {
            frame.final_size = end;
        }

        frame.received[index] = true;
        frame.received_count += 1;

        if !frame.is_complete() {
            return FragmentOutcome::Pending;
        }

        let Some(frame) = self.pending.remove(&frame_id) else {
            return FragmentOutcome::Pending;
        };
        let elapsed = now.saturating_duration_since(frame.created_at);
        let data = frame.into_data();

        debug!(
            "프레임 {} 완료: {} bytes, {:.2}ms",
            frame_id,
            data.len(),
            elapsed.as_secs_f64() * 1000.0
        );

        FragmentOutcome::Complete(CompletedFrame { frame_id, data })
    }

    /// 유휴 프레임 정리 후 그래도 가득 차 있으면 가장 먼저 들어온 프레임 축출
    fn make_room(&mut self, now: Instant) {
        self.evict_expired(now);

        if self.pending.len() < self.config.max_pending_frames {
            return;
        }

        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, frame)| frame.sequence)
            .map(|(&frame_id, _)| frame_id);

        if let Some(frame_id) = oldest {
            if let Some(frame) = self.pending.remove(&frame_id) {
                warn!(
                    "프레임 {} 축출 (테이블 가득 참): {:.1}% 수신",
                    frame_id,
                    frame.receive_ratio() * 100.0
                );
                self.stats.evicted_capacity += 1;
            }
        }
    }

    /// 유휴 타임아웃이 지난 프레임 제거
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let timeout = self.config.frame_timeout;
        let before = self.pending.len();

        self.pending.retain(|frame_id, frame| {
            if now.saturating_duration_since(frame.last_update) > timeout {
                warn!(
                    "프레임 {} 타임아웃: {:.1}% 수신",
                    frame_id,
                    frame.receive_ratio() * 100.0
                );
                false
            } else {
                true
            }
        });

        let evicted = before - self.pending.len();
        self.stats.evicted_idle += evicted as u64;
        evicted
    }

    /// 조립 중인 프레임 수
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    pub fn is_tracking(&self, frame_id: FrameId) -> bool {
        self.pending.contains_key(&frame_id)
    }

    /// 조립 중인 프레임의 수신률
    pub fn progress(&self, frame_id: FrameId) -> Option<f64> {
        self.pending.get(&frame_id).map(PendingFrame::receive_ratio)
    }

    /// 조립 중인 프레임 모두 폐기
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats.clone()
    }
}
