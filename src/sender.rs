//! 송신자
//!
//! - 프레임마다 다음 frame_id 할당 (u32 랩어라운드)
//! - 제로카피 분할 후 배치 전송 한 번
//! - 전송 중단 시 통계에 반영하고 에러 전파

use std::net::SocketAddr;

use tracing::{debug, info};

use crate::channel::{BatchIo, DatagramChannel, NativeBatchIo};
use crate::header::FrameId;
use crate::packetizer::Packetizer;
use crate::stats::SendStats;
use crate::{Config, Error, Result};

/// 프레임 하나의 전송 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub frame_id: FrameId,

    /// 전송한 프래그먼트 수
    pub fragments: usize,

    /// 프레임 크기 (바이트)
    pub bytes: usize,
}

/// 송신자
///
/// `send_frame`이 `&mut self`를 받으므로 한 인스턴스를 여러 스레드가 동시에 쓸 수 없다.
pub struct Sender<B: BatchIo = NativeBatchIo> {
    channel: DatagramChannel<B>,
    packetizer: Packetizer,
    next_frame_id: FrameId,
    stats: SendStats,
}

impl Sender<NativeBatchIo> {
    /// `dest`로 보내는 송신자 생성
    pub fn connect(dest: SocketAddr, config: &Config) -> Result<Self> {
        config.validate()?;
        let channel = DatagramChannel::connect(dest, &config.channel())?;
        info!("FDP 송신자 준비: {} (max payload {})", dest, config.max_payload);
        Self::with_channel(channel, config)
    }
}

impl<B: BatchIo> Sender<B> {
    /// 이미 만든 채널로 송신자 생성
    pub fn with_channel(channel: DatagramChannel<B>, config: &Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            channel,
            packetizer: Packetizer::new(config.max_payload),
            next_frame_id: 0,
            stats: SendStats::default(),
        })
    }

    /// 프레임 전송
    ///
    /// 분할에 실패해도 frame_id는 소비된다.
    pub fn send_frame(&mut self, data: &[u8]) -> Result<SendReport> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let frame = self.packetizer.prepare(data, frame_id)?;
        let fragments = frame.len();

        match self.channel.send_batch(&frame) {
            Ok(_) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
                debug!(
                    "프레임 {} 전송: {} bytes, {} 프래그먼트",
                    frame_id,
                    data.len(),
                    fragments
                );
                Ok(SendReport {
                    frame_id,
                    fragments,
                    bytes: data.len(),
                })
            }
            Err(Error::BatchAborted {
                sent,
                total,
                source,
            }) => {
                self.stats.frames_aborted += 1;
                self.stats.fragments_dropped += (total - sent) as u64;
                Err(Error::BatchAborted {
                    sent,
                    total,
                    source,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 다음에 쓸 frame_id
    pub fn next_frame_id(&self) -> FrameId {
        self.next_frame_id
    }

    pub fn set_next_frame_id(&mut self, frame_id: FrameId) {
        self.next_frame_id = frame_id;
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.channel.peer_addr()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> SendStats {
        SendStats {
            channel: self.channel.stats(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::channel::testing::{ScriptedIo, SendStep};
    use crate::header::FragmentHeader;

    fn sender(io: ScriptedIo, max_payload: usize) -> Sender<ScriptedIo> {
        let config = Config {
            max_payload,
            ..Config::default()
        };
        let channel = DatagramChannel::with_io(
            io,
            Some(SocketAddr::from(([127, 0, 0, 1], 5000))),
            &config.channel(),
        );
        Sender::with_channel(channel, &config).unwrap()
    }

    #[test]
    fn test_frame_ids_increment() {
        let io = ScriptedIo::new();
        let mut sender = sender(io.clone(), 1400);

        let first = sender.send_frame(&[1u8; 3500]).unwrap();
        let second = sender.send_frame(&[2u8; 10]).unwrap();

        assert_eq!(first, SendReport { frame_id: 0, fragments: 3, bytes: 3500 });
        assert_eq!(second, SendReport { frame_id: 1, fragments: 1, bytes: 10 });

        let headers: Vec<FragmentHeader> = io
            .sent()
            .iter()
            .map(|d| FragmentHeader::decode(d).unwrap())
            .collect();
        assert_eq!(
            headers,
            vec![
                FragmentHeader::new(0, 0, 3),
                FragmentHeader::new(0, 1, 3),
                FragmentHeader::new(0, 2, 3),
                FragmentHeader::new(1, 0, 1),
            ]
        );

        let stats = sender.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 3510);
        assert_eq!(stats.channel.datagrams_sent, 4);
    }

    #[test]
    fn test_frame_id_wraps() {
        let mut sender = sender(ScriptedIo::new(), 100);
        sender.set_next_frame_id(u32::MAX);

        assert_eq!(sender.send_frame(b"a").unwrap().frame_id, u32::MAX);
        assert_eq!(sender.send_frame(b"b").unwrap().frame_id, 0);
        assert_eq!(sender.next_frame_id(), 1);
    }

    #[test]
    fn test_empty_frame_sends_one_datagram() {
        let io = ScriptedIo::new();
        let mut sender = sender(io.clone(), 100);

        let report = sender.send_frame(&[]).unwrap();
        assert_eq!(report.fragments, 1);
        assert_eq!(io.sent(), vec![FragmentHeader::new(0, 0, 1).encode().to_vec()]);
    }

    #[test]
    fn test_aborted_frame_is_counted() {
        let io = ScriptedIo::new();
        io.push_send(SendStep::Send(1));
        io.push_send(SendStep::Fail(io::ErrorKind::ConnectionRefused));
        let mut sender = sender(io, 10);

        let result = sender.send_frame(&[0u8; 45]);
        assert!(matches!(result, Err(Error::BatchAborted { sent: 1, total: 5, .. })));

        let stats = sender.stats();
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.frames_aborted, 1);
        assert_eq!(stats.fragments_dropped, 4);

        // 다음 프레임은 새 id로 정상 전송
        assert_eq!(sender.send_frame(b"ok").unwrap().frame_id, 1);
    }

    #[test]
    fn test_zero_payload_rejected() {
        let config = Config {
            max_payload: 0,
            ..Config::default()
        };
        let channel = DatagramChannel::with_io(
            ScriptedIo::new(),
            Some(SocketAddr::from(([127, 0, 0, 1], 5000))),
            &config.channel(),
        );
        assert!(matches!(
            Sender::with_channel(channel, &config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
