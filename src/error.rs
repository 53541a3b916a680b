//! 에러 타입 정의

use thiserror::Error;

/// FDP 에러 타입
///
/// 프래그먼트/프레임 단위의 문제(중복, 범위 초과 등)는 에러가 아니라
/// [`crate::reassembler::FragmentOutcome`]으로 흡수된다. 여기에는 호출자에게
/// 전파되어야 하는 것만 있다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프레임이 너무 큼: {size} bytes (최대 {max} bytes)")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("배치 전송 중단: {sent}/{total} 프래그먼트 전송 후 실패: {source}")]
    BatchAborted {
        sent: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("유효하지 않은 주소: {0}")]
    InvalidAddress(String),

    #[error("{0} 복제는 지원되지 않음 (같은 포트를 두 번 바인딩할 수 없음)")]
    CloneUnsupported(&'static str),

    #[error("버퍼 크기 불일치: expected {expected}, got {got}")]
    BufferSize { expected: usize, got: usize },

    #[error("수신자가 정지됨")]
    ReceiverStopped,

    #[error("수신 워커 스레드 패닉")]
    WorkerPanicked,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
