//! 전송 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// 조립기 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblyStats {
    /// 받아들인 프래그먼트 수
    pub fragments_accepted: u64,

    /// 완성된 프레임 수
    pub frames_completed: u64,

    /// 완성된 프레임의 총 바이트
    pub bytes_completed: u64,

    /// 중복 프래그먼트 수
    pub duplicates: u64,

    /// 거부된 프래그먼트 수
    pub rejected: u64,

    /// 유휴 타임아웃으로 축출된 프레임 수
    pub evicted_idle: u64,

    /// 용량 초과로 축출된 프레임 수
    pub evicted_capacity: u64,

    /// 동시에 조립 중이던 최대 프레임 수
    pub pending_high_water: usize,
}

impl ReassemblyStats {
    /// 축출로 잃은 프레임 수
    pub fn frames_lost(&self) -> u64 {
        self.evicted_idle + self.evicted_capacity
    }
}

/// 데이터그램 채널 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// 배치 송신 시스템 콜 수
    pub send_calls: u64,

    /// 송신한 데이터그램 수
    pub datagrams_sent: u64,

    /// 배치 수신 시스템 콜 수 (타임아웃 제외)
    pub recv_calls: u64,

    /// 수신한 데이터그램 수
    pub datagrams_received: u64,

    /// 헤더보다 짧아 버려진 데이터그램 수
    pub malformed_datagrams: u64,

    /// 송신 버퍼 가득 참(EAGAIN) 재시도 수
    pub would_block_retries: u64,

    /// 시그널 인터럽트(EINTR) 재시도 수
    pub interrupted_retries: u64,
}

/// 송신 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendStats {
    /// 전송 완료된 프레임 수
    pub frames_sent: u64,

    /// 전송 완료된 페이로드 바이트
    pub bytes_sent: u64,

    /// 중간에 중단된 프레임 수
    pub frames_aborted: u64,

    /// 중단으로 버려진 프래그먼트 수
    pub fragments_dropped: u64,

    pub channel: ChannelStats,
}

impl SendStats {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Frames: {} | Bytes: {} | Datagrams: {} | Syscalls: {} | Aborted: {} ({} fragments dropped) | EAGAIN: {}",
            self.frames_sent,
            self.bytes_sent,
            self.channel.datagrams_sent,
            self.channel.send_calls,
            self.frames_aborted,
            self.fragments_dropped,
            self.channel.would_block_retries,
        )
    }
}

/// 수신 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiveStats {
    /// 완료 큐에 넣은 프레임 수
    pub frames_queued: u64,

    pub channel: ChannelStats,

    pub reassembly: ReassemblyStats,
}

impl ReceiveStats {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Frames: {} | Datagrams: {} (malformed {}) | Duplicates: {} | Rejected: {} | Lost: {} | Pending max: {}",
            self.frames_queued,
            self.channel.datagrams_received,
            self.channel.malformed_datagrams,
            self.reassembly.duplicates,
            self.reassembly.rejected,
            self.reassembly.frames_lost(),
            self.reassembly.pending_high_water,
        )
    }
}

/// 도착 기록
#[derive(Debug, Clone, Copy)]
struct Arrival {
    timestamp: Instant,
    size: usize,
}

/// 윈도우 기반 처리율 측정기
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    /// 최근 도착 기록
    arrivals: VecDeque<Arrival>,

    /// 윈도우 크기
    window_size: usize,

    /// 총 프레임 수
    pub total_frames: u64,

    /// 총 바이트
    pub total_bytes: u64,

    start_time: Instant,
}

impl ThroughputMeter {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(2);
        Self {
            arrivals: VecDeque::with_capacity(window_size),
            window_size,
            total_frames: 0,
            total_bytes: 0,
            start_time: Instant::now(),
        }
    }

    /// 프레임 도착 기록
    pub fn record(&mut self, size: usize) {
        self.record_at(size, Instant::now());
    }

    pub fn record_at(&mut self, size: usize, timestamp: Instant) {
        if self.arrivals.len() >= self.window_size {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(Arrival { timestamp, size });

        self.total_frames += 1;
        self.total_bytes += size as u64;
    }

    /// 윈도우 내 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let (Some(first), Some(last)) = (self.arrivals.front(), self.arrivals.back()) else {
            return 0.0;
        };

        let duration = last.timestamp.duration_since(first.timestamp);
        if self.arrivals.len() < 2 || duration.is_zero() {
            return 0.0;
        }

        // 첫 기록은 구간 시작점이므로 제외
        let bytes: usize = self.arrivals.iter().skip(1).map(|a| a.size).sum();
        bytes as f64 / duration.as_secs_f64()
    }

    /// 윈도우 내 처리율 (Mbps)
    pub fn mbps(&self) -> f64 {
        self.throughput() * 8.0 / 1_000_000.0
    }

    /// 시작 후 평균 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(100)
    }
}

/// 프레임 도착 간격 측정기 (지수 이동 평균)
#[derive(Debug, Clone, Default)]
pub struct JitterMeter {
    last_arrival: Option<Instant>,
    average_ms: f64,
}

impl JitterMeter {
    /// 새 샘플 가중치
    const WEIGHT: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    /// 도착 기록
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_arrival {
            let delta_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            self.average_ms = self.average_ms * (1.0 - Self::WEIGHT) + delta_ms * Self::WEIGHT;
        }
        self.last_arrival = Some(now);
    }

    /// 평균 도착 간격 (밀리초)
    pub fn jitter_ms(&self) -> f64 {
        self.average_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_window() {
        let mut meter = ThroughputMeter::new(3);
        let t0 = Instant::now();

        assert_eq!(meter.throughput(), 0.0);
        meter.record_at(1000, t0);
        assert_eq!(meter.throughput(), 0.0);

        meter.record_at(1000, t0 + Duration::from_millis(500));
        meter.record_at(1000, t0 + Duration::from_millis(1000));
        assert!((meter.throughput() - 2000.0).abs() < 1e-6);

        // 윈도우 밖 기록은 버려짐
        meter.record_at(4000, t0 + Duration::from_millis(2000));
        assert!((meter.throughput() - 3333.333).abs() < 0.01);
        assert_eq!(meter.total_frames, 4);
        assert_eq!(meter.total_bytes, 7000);
    }

    #[test]
    fn test_jitter_ema() {
        let mut jitter = JitterMeter::new();
        let t0 = Instant::now();

        jitter.record(t0);
        assert_eq!(jitter.jitter_ms(), 0.0);

        jitter.record(t0 + Duration::from_millis(10));
        assert!((jitter.jitter_ms() - 1.0).abs() < 1e-9);

        jitter.record(t0 + Duration::from_millis(20));
        assert!((jitter.jitter_ms() - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_summaries() {
        let stats = ReceiveStats {
            frames_queued: 3,
            reassembly: ReassemblyStats {
                evicted_idle: 1,
                evicted_capacity: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(stats.reassembly.frames_lost(), 3);
        assert!(stats.summary().contains("Lost: 3"));

        let stats = SendStats {
            frames_aborted: 1,
            fragments_dropped: 4,
            ..Default::default()
        };
        assert!(stats.summary().contains("Aborted: 1 (4 fragments dropped)"));
    }
}
