//! # FDP (Frame Datagram Protocol)
//!
//! UDP 위에서 큰 프레임을 잘라 보내고 다시 조립하는 전송 계층
//!
//! ## 핵심 특징
//! - **제로카피 분할**: 프레임을 복사하지 않고 (헤더, 페이로드 범위) 디스크립터로 분할
//! - **배치 시스템 콜**: `sendmmsg`/`recvmmsg`로 호출 한 번에 여러 데이터그램
//! - **순서 무관 조립**: 프래그먼트가 어떤 순서로 와도 오프셋으로 바로 복사
//! - **유한 상태**: 조립 중 프레임 수 제한, 유휴 타임아웃 후 축출
//! - **백그라운드 수신**: 워커 스레드가 완성 프레임을 큐에 넣음
//!
//! 재전송, 혼잡 제어, 암호화는 하지 않는다. 손실된 프레임은 그냥 사라진다.

pub mod backoff;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod header;
pub mod packetizer;
pub mod reassembler;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use channel::{BatchIo, DatagramChannel, LoopBatchIo, NativeBatchIo, RecvBatch};
#[cfg(target_os = "linux")]
pub use channel::MmsgBatchIo;
pub use config::Config;
pub use endpoint::{FrameSink, FrameSource, Generated, UdpSink, UdpSource};
pub use error::{Error, Result};
pub use header::{FragmentHeader, FrameId};
pub use packetizer::{Fragment, Packetizer, PreparedFrame};
pub use reassembler::{CompletedFrame, FragmentOutcome, Reassembler, RejectReason};
pub use receiver::Receiver;
pub use sender::{SendReport, Sender};
pub use stats::{ReceiveStats, SendStats};

/// 와이어 포맷 세대 (32비트 필드 12바이트 헤더, 16비트 구버전과 비호환)
pub const WIRE_VERSION: u8 = 2;

/// 와이어 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 12;

/// 기본 패킷당 최대 페이로드 (바이트)
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

/// 기본 페이로드 기준 최대 프레임 크기 (2^32-1 프래그먼트)
pub const MAX_FRAME_SIZE: u64 = u32::MAX as u64 * DEFAULT_MAX_PAYLOAD as u64;

/// 기본 수신 배치 크기
pub const DEFAULT_RECV_BATCH_SIZE: usize = 64;

/// 기본 커널 소켓 버퍼 크기
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024 * 1024; // 32MB

/// 수신 슬롯 여유분 (헤더 + 최대 페이로드 뒤)
pub const RX_SLOT_MARGIN: usize = 64;

/// `max_payload` 기준 최대 프레임 크기
pub fn max_frame_size(max_payload: usize) -> u64 {
    (u32::MAX as u64).saturating_mul(max_payload as u64)
}
