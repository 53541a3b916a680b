//! 프래그먼트 분할기 (송신측)
//!
//! 큰 프레임을 데이터그램 크기 조각으로 나눈다. 페이로드는 복사하지 않고
//! 입력 버퍼의 슬라이스로만 참조하므로 scatter/gather 전송에 그대로 넘길 수 있다.

use tracing::debug;

use crate::header::{FragmentHeader, FrameId};
use crate::{max_frame_size, Error, Result, HEADER_SIZE};

/// 디스크립터 슬롯
///
/// 포인터 대신 입력 버퍼 내 범위를 저장한다.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    header: FragmentHeader,
    encoded: [u8; HEADER_SIZE],
    start: usize,
    end: usize,
}

/// 프래그먼트 분할기
///
/// 디스크립터 풀은 지금까지 본 가장 큰 프레임 크기에 맞춰 커지기만 한다.
pub struct Packetizer {
    max_payload: usize,
    pool: Vec<Slot>,
}

impl Packetizer {
    /// 분할기 생성 (풀은 첫 `prepare`에서 채워짐)
    ///
    /// # Panics
    ///
    /// `max_payload`가 0이면 패닉. `Config::validate`를 거친 값은 안전하다.
    pub fn new(max_payload: usize) -> Self {
        assert!(max_payload > 0, "max_payload must be non-zero");

        Self {
            max_payload,
            pool: Vec::new(),
        }
    }

    /// 패킷당 최대 페이로드
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 현재 풀에 준비된 디스크립터 수
    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// 프레임 크기에 필요한 프래그먼트 수 계산
    ///
    /// 빈 프레임도 프레임 경계를 알리기 위해 프래그먼트 1개로 보낸다.
    pub fn fragment_count(&self, size: u64) -> Result<u32> {
        let max = max_frame_size(self.max_payload);
        if size > max {
            return Err(Error::FrameTooLarge { size, max });
        }

        let count = size.div_ceil(self.max_payload as u64).max(1);
        Ok(count as u32)
    }

    /// 프레임을 프래그먼트로 분할
    pub fn prepare<'a>(
        &'a mut self,
        data: &'a [u8],
        frame_id: FrameId,
    ) -> Result<PreparedFrame<'a>> {
        let total_frags = self.fragment_count(data.len() as u64)?;
        let count = total_frags as usize;

        if count > self.pool.len() {
            debug!(
                "디스크립터 풀 확장: {} -> {} (frame_id={})",
                self.pool.len(),
                count,
                frame_id
            );
            self.pool.resize(count, Slot::default());
        }

        let mut offset = 0;
        for (index, slot) in self.pool[..count].iter_mut().enumerate() {
            let end = (offset + self.max_payload).min(data.len());
            let header = FragmentHeader::new(frame_id, index as u32, total_frags);

            *slot = Slot {
                header,
                encoded: header.encode(),
                start: offset,
                end,
            };
            offset = end;
        }

        Ok(PreparedFrame {
            frame_id,
            slots: &self.pool[..count],
            data,
        })
    }
}

/// 전송 준비가 끝난 프레임
///
/// 분할기의 풀과 입력 버퍼를 빌려 쓰므로 다음 `prepare` 호출 전까지만 유효하다.
#[derive(Debug, Clone, Copy)]
pub struct PreparedFrame<'a> {
    frame_id: FrameId,
    slots: &'a [Slot],
    data: &'a [u8],
}

impl<'a> PreparedFrame<'a> {
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// 프래그먼트 수
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 프레임 전체 페이로드 크기
    pub fn payload_bytes(&self) -> usize {
        self.data.len()
    }

    /// 헤더 포함 전송 바이트 수
    pub fn wire_bytes(&self) -> usize {
        self.data.len() + self.slots.len() * HEADER_SIZE
    }

    pub fn get(&self, index: usize) -> Option<Fragment<'a>> {
        let slots: &'a [Slot] = self.slots;
        let data: &'a [u8] = self.data;
        let slot = slots.get(index)?;
        Some(Fragment {
            header: slot.header,
            encoded: &slot.encoded,
            payload: &data[slot.start..slot.end],
        })
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Fragment<'a>> + 'a {
        let data = self.data;
        let slots: &'a [Slot] = self.slots;
        slots.iter().map(move |slot| Fragment {
            header: slot.header,
            encoded: &slot.encoded,
            payload: &data[slot.start..slot.end],
        })
    }

    /// `from`번째 이후의 프래그먼트
    pub fn iter_from(&self, from: usize) -> impl ExactSizeIterator<Item = Fragment<'a>> + 'a {
        self.iter().skip(from)
    }
}

/// 프래그먼트 하나 (헤더 바이트 + 페이로드 뷰)
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    header: FragmentHeader,
    encoded: &'a [u8; HEADER_SIZE],
    payload: &'a [u8],
}

impl<'a> Fragment<'a> {
    pub fn header(&self) -> FragmentHeader {
        self.header
    }

    /// 인코딩된 헤더
    pub fn header_bytes(&self) -> &'a [u8; HEADER_SIZE] {
        self.encoded
    }

    /// 입력 버퍼의 슬라이스 (복사 없음)
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// 데이터그램 전체 길이
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 연속 버퍼로 직렬화 (테스트/디버깅용, 복사 발생)
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(self.encoded);
        buf.extend_from_slice(self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_3500_bytes() {
        let mut packetizer = Packetizer::new(1400);
        let data: Vec<u8> = (0..3500u32).map(|i| i as u8).collect();

        let frame = packetizer.prepare(&data, 100).unwrap();
        assert_eq!(frame.len(), 3);

        let sizes: Vec<usize> = frame.iter().map(|f| f.payload().len()).collect();
        assert_eq!(sizes, vec![1400, 1400, 700]);

        for (i, fragment) in frame.iter().enumerate() {
            assert_eq!(fragment.header(), FragmentHeader::new(100, i as u32, 3));
            assert_eq!(fragment.header_bytes(), &fragment.header().encode());
        }
        assert_eq!(frame.wire_bytes(), 3500 + 3 * HEADER_SIZE);
    }

    #[test]
    fn test_payload_is_view_into_input() {
        let mut packetizer = Packetizer::new(100);
        let data = vec![7u8; 250];

        let frame = packetizer.prepare(&data, 1).unwrap();
        for (i, fragment) in frame.iter().enumerate() {
            assert_eq!(fragment.payload().as_ptr(), data[i * 100..].as_ptr());
        }
    }

    #[test]
    fn test_empty_frame_is_one_fragment() {
        let mut packetizer = Packetizer::new(1400);
        let frame = packetizer.prepare(&[], 5).unwrap();

        assert_eq!(frame.len(), 1);
        let fragment = frame.get(0).unwrap();
        assert_eq!(fragment.header(), FragmentHeader::new(5, 0, 1));
        assert!(fragment.payload().is_empty());
        assert_eq!(fragment.wire_len(), HEADER_SIZE);
    }

    #[test]
    fn test_exact_multiple() {
        let mut packetizer = Packetizer::new(1400);
        let data = vec![1u8; 2800];

        let frame = packetizer.prepare(&data, 9).unwrap();
        assert_eq!(frame.len(), 2);
        assert!(frame.iter().all(|f| f.payload().len() == 1400));
    }

    #[test]
    fn test_pool_only_grows() {
        let mut packetizer = Packetizer::new(10);
        assert_eq!(packetizer.capacity(), 0);
        // 첫 프레임 전에는 미리 잡아둔 메모리도 없음
        assert_eq!(packetizer.pool.capacity(), 0);

        let big = vec![0u8; 95];
        assert_eq!(packetizer.prepare(&big, 1).unwrap().len(), 10);
        assert_eq!(packetizer.capacity(), 10);

        let small = vec![0u8; 15];
        let frame = packetizer.prepare(&small, 2).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.get(1).unwrap().payload().len(), 5);
        assert!(frame.get(2).is_none());
        assert_eq!(packetizer.capacity(), 10);
    }

    #[test]
    fn test_frame_too_large() {
        let packetizer = Packetizer::new(1400);
        let max = max_frame_size(1400);

        assert_eq!(packetizer.fragment_count(max).unwrap(), u32::MAX);
        assert!(matches!(
            packetizer.fragment_count(max + 1),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_to_datagram() {
        let mut packetizer = Packetizer::new(4);
        let frame = packetizer.prepare(b"abcdef", 3).unwrap();

        let datagram = frame.get(1).unwrap().to_datagram();
        let (header, payload) = FragmentHeader::split_datagram(&datagram).unwrap();
        assert_eq!(header, FragmentHeader::new(3, 1, 2));
        assert_eq!(payload, b"ef");
    }
}
