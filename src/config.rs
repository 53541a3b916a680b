//! 프로토콜 설정

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, DEFAULT_MAX_PAYLOAD, DEFAULT_RECV_BATCH_SIZE, DEFAULT_SOCKET_BUFFER_SIZE,
    HEADER_SIZE, RX_SLOT_MARGIN,
};

/// UDP 페이로드 이론상 최대값 (65535 - IP 20 - UDP 8)
const MAX_UDP_PAYLOAD: usize = 65_507;

/// FDP 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// 패킷당 최대 페이로드 (바이트)
    /// 송신측과 수신측이 반드시 같은 값을 써야 함 (오프셋 계산에 사용)
    pub max_payload: usize,

    /// 커널 송수신 버퍼 크기 (바이트)
    /// 커널 한도(net.core.rmem_max)보다 크면 조용히 잘림
    pub socket_buffer_size: usize,

    /// 수신 타임아웃 (밀리초)
    /// 수신 루프가 정지 플래그를 확인하는 최대 간격
    pub recv_timeout_ms: u64,

    /// 한 번의 시스템 콜로 읽을 최대 데이터그램 수
    pub recv_batch_size: usize,

    /// 동시에 조립 중인 최대 프레임 수
    pub max_pending_frames: usize,

    /// 미완성 프레임 유휴 타임아웃 (밀리초)
    pub frame_timeout_ms: u64,

    /// 수신측에서 허용하는 최대 프레임 크기 (바이트)
    pub max_frame_size: u64,

    /// SO_REUSEADDR 설정 여부
    pub reuse_address: bool,

    /// 송신 버퍼 가득 참(EAGAIN) 시 첫 대기 시간 (마이크로초)
    pub send_backoff_initial_us: u64,

    /// 송신 재시도 최대 대기 시간 (마이크로초)
    pub send_backoff_max_us: u64,

    /// sleep 전에 yield만 하는 재시도 횟수
    pub send_backoff_spins: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE, // 32MB
            recv_timeout_ms: 100,
            recv_batch_size: DEFAULT_RECV_BATCH_SIZE,
            max_pending_frames: 10,
            frame_timeout_ms: 1000,
            max_frame_size: 256 * 1024 * 1024, // 256MB
            reuse_address: false,
            send_backoff_initial_us: 10,
            send_backoff_max_us: 1000,
            send_backoff_spins: 8,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저지연 설정 (작은 프레임, 빠른 정지 응답)
    pub fn low_latency() -> Self {
        Self {
            socket_buffer_size: 4 * 1024 * 1024, // 4MB
            recv_timeout_ms: 20,
            recv_batch_size: 16,
            max_pending_frames: 4,
            frame_timeout_ms: 100,
            max_frame_size: 16 * 1024 * 1024,
            send_backoff_initial_us: 1,
            send_backoff_max_us: 100,
            send_backoff_spins: 32,
            ..Self::default()
        }
    }

    /// 고처리량 설정 (큰 프레임, 큰 배치)
    pub fn high_throughput() -> Self {
        Self {
            socket_buffer_size: 64 * 1024 * 1024, // 64MB
            recv_timeout_ms: 200,
            recv_batch_size: 256,
            max_pending_frames: 32,
            frame_timeout_ms: 2000,
            max_frame_size: 1024 * 1024 * 1024, // 1GB
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 || self.max_payload + HEADER_SIZE > MAX_UDP_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "max_payload must be in 1..={}, got {}",
                MAX_UDP_PAYLOAD - HEADER_SIZE,
                self.max_payload
            )));
        }
        if self.recv_timeout_ms == 0 {
            return Err(Error::InvalidConfig("recv_timeout_ms must be > 0".into()));
        }
        if self.recv_batch_size == 0 {
            return Err(Error::InvalidConfig("recv_batch_size must be > 0".into()));
        }
        if self.max_pending_frames == 0 {
            return Err(Error::InvalidConfig("max_pending_frames must be > 0".into()));
        }
        if self.send_backoff_initial_us > self.send_backoff_max_us {
            return Err(Error::InvalidConfig(
                "send_backoff_initial_us must not exceed send_backoff_max_us".into(),
            ));
        }
        Ok(())
    }

    /// 수신 슬롯 크기 (헤더 + 페이로드 + 여유분)
    pub fn rx_slot_size(&self) -> usize {
        HEADER_SIZE + self.max_payload + RX_SLOT_MARGIN
    }

    /// 채널 설정 추출
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            socket_buffer_size: self.socket_buffer_size,
            recv_timeout: Some(Duration::from_millis(self.recv_timeout_ms)),
            reuse_address: self.reuse_address,
            backoff: BackoffConfig {
                initial: Duration::from_micros(self.send_backoff_initial_us),
                max: Duration::from_micros(self.send_backoff_max_us),
                spins: self.send_backoff_spins,
            },
        }
    }

    /// 조립기 설정 추출
    pub fn reassembly(&self) -> ReassemblyConfig {
        ReassemblyConfig {
            max_payload: self.max_payload,
            max_pending_frames: self.max_pending_frames,
            frame_timeout: Duration::from_millis(self.frame_timeout_ms),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// 데이터그램 채널 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub socket_buffer_size: usize,
    pub recv_timeout: Option<Duration>,
    pub reuse_address: bool,
    pub backoff: BackoffConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Config::default().channel()
    }
}

/// 송신 재시도 백오프 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub spins: u32,
}

/// 조립기 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyConfig {
    pub max_payload: usize,
    pub max_pending_frames: usize,
    pub frame_timeout: Duration,
    pub max_frame_size: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Config::default().reassembly()
    }
}
