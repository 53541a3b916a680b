//! 와이어 헤더 정의
//!
//! 모든 데이터그램은 12바이트 헤더 + 페이로드로 구성된다.
//!
//! ```text
//!  0               4               8               12
//! +---------------+---------------+---------------+----------------+
//! |   frame_id    |  frag_index   |  total_frags  |  payload ...   |
//! +---------------+---------------+---------------+----------------+
//!   u32 LE          u32 LE          u32 LE
//! ```
//!
//! 16비트 필드를 쓰는 8바이트 구버전 헤더와는 호환되지 않는다.

use bytes::{Buf, BufMut};

use crate::HEADER_SIZE;

/// 프레임 ID (32비트, 2^32에서 랩어라운드)
pub type FrameId = u32;

/// 프래그먼트 헤더
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    /// 프레임 ID
    pub frame_id: FrameId,

    /// 프레임 내 프래그먼트 인덱스 (0부터)
    pub frag_index: u32,

    /// 프레임의 총 프래그먼트 수
    pub total_frags: u32,
}

impl FragmentHeader {
    pub const fn new(frame_id: FrameId, frag_index: u32, total_frags: u32) -> Self {
        Self {
            frame_id,
            frag_index,
            total_frags,
        }
    }

    /// 12바이트로 인코딩
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut cursor = &mut out[..];
        self.encode_into(&mut cursor);
        out
    }

    /// 버퍼에 인코딩
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.frame_id);
        buf.put_u32_le(self.frag_index);
        buf.put_u32_le(self.total_frags);
    }

    /// 바이트에서 디코딩 (12바이트 미만이면 None)
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Some(Self {
            frame_id: buf.get_u32_le(),
            frag_index: buf.get_u32_le(),
            total_frags: buf.get_u32_le(),
        })
    }

    /// 데이터그램을 헤더와 페이로드 뷰로 분리
    pub fn split_datagram(datagram: &[u8]) -> Option<(Self, &[u8])> {
        let header = Self::decode(datagram)?;
        Some((header, &datagram[HEADER_SIZE..]))
    }

    /// 마지막 프래그먼트 여부
    pub fn is_last(&self) -> bool {
        self.total_frags > 0 && self.frag_index == self.total_frags - 1
    }

    /// 인덱스가 범위 안에 있는지
    pub fn is_valid(&self) -> bool {
        self.frag_index < self.total_frags
    }
}
