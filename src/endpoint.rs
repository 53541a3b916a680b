//! 고정 크기 버퍼 스트림용 엔드포인트
//!
//! 처리 파이프라인이 프레임을 "소스에서 생성"하고 "싱크로 보내는" 모양으로 쓰도록
//! 수신자/송신자를 감싼다. 모든 버퍼는 `max_data_size` 바이트로 고정된다.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::channel::{BatchIo, NativeBatchIo};
use crate::receiver::Receiver;
use crate::sender::{SendReport, Sender};
use crate::{Config, Error, Result};

/// 소스 한 번의 생성 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generated {
    /// 프레임 수신. `len`은 수신된 원래 길이 (버퍼보다 길면 잘림)
    Frame { len: usize },
    /// 타임아웃, 버퍼는 0으로 채워짐
    Timeout,
}

/// 고정 크기 버퍼를 생성하는 쪽
pub trait FrameSource: Send {
    fn max_data_size(&self) -> usize;

    /// `out`(정확히 `max_data_size` 바이트)을 다음 프레임으로 채움
    fn generate(&mut self, out: &mut [u8]) -> Result<Generated>;

    fn try_clone(&self) -> Result<Box<dyn FrameSource>>;
}

/// 고정 크기 버퍼를 소비하는 쪽
pub trait FrameSink: Send {
    fn max_data_size(&self) -> usize;

    /// `data`의 앞 `max_data_size` 바이트를 프레임 하나로 전송
    fn send(&mut self, data: &[u8]) -> Result<SendReport>;

    fn try_clone(&self) -> Result<Box<dyn FrameSink>>;
}

/// UDP 수신 소스
pub struct UdpSource<B: BatchIo + 'static = NativeBatchIo> {
    receiver: Receiver<B>,
    max_data_size: usize,
    timeout: Option<Duration>,
}

impl UdpSource<NativeBatchIo> {
    /// `port`에서 수신 시작
    pub fn bind(
        max_data_size: usize,
        port: u16,
        timeout: Option<Duration>,
        config: &Config,
    ) -> Result<Self> {
        let receiver = Receiver::bind(port, config)?;
        Self::from_receiver(receiver, max_data_size, timeout)
    }
}

impl<B: BatchIo + 'static> UdpSource<B> {
    /// 수신자를 감싸고 시작
    pub fn from_receiver(
        receiver: Receiver<B>,
        max_data_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        receiver.start()?;
        Ok(Self {
            receiver,
            max_data_size,
            timeout,
        })
    }

    pub fn receiver(&self) -> &Receiver<B> {
        &self.receiver
    }
}

impl<B: BatchIo + 'static> FrameSource for UdpSource<B> {
    fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    fn generate(&mut self, out: &mut [u8]) -> Result<Generated> {
        if out.len() != self.max_data_size {
            return Err(Error::BufferSize {
                expected: self.max_data_size,
                got: out.len(),
            });
        }

        match self.receiver.pop_frame(self.timeout) {
            Some(frame) => {
                let copied = frame.len().min(out.len());
                out[..copied].copy_from_slice(&frame[..copied]);
                out[copied..].fill(0);
                if frame.len() > out.len() {
                    debug!("프레임 잘림: {} -> {} bytes", frame.len(), out.len());
                }
                Ok(Generated::Frame { len: frame.len() })
            }
            None => {
                out.fill(0);
                if !self.receiver.is_running() {
                    return Err(Error::ReceiverStopped);
                }
                Ok(Generated::Timeout)
            }
        }
    }

    fn try_clone(&self) -> Result<Box<dyn FrameSource>> {
        Err(Error::CloneUnsupported("UdpSource"))
    }
}

/// UDP 송신 싱크
pub struct UdpSink<B: BatchIo = NativeBatchIo> {
    sender: Sender<B>,
    max_data_size: usize,
}

impl UdpSink<NativeBatchIo> {
    /// `dest`로 보내는 싱크 생성
    pub fn connect(max_data_size: usize, dest: SocketAddr, config: &Config) -> Result<Self> {
        let sender = Sender::connect(dest, config)?;
        Ok(Self::from_sender(sender, max_data_size))
    }
}

impl<B: BatchIo> UdpSink<B> {
    pub fn from_sender(sender: Sender<B>, max_data_size: usize) -> Self {
        Self {
            sender,
            max_data_size,
        }
    }

    pub fn sender(&self) -> &Sender<B> {
        &self.sender
    }
}

impl<B: BatchIo> FrameSink for UdpSink<B> {
    fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    fn send(&mut self, data: &[u8]) -> Result<SendReport> {
        if data.len() < self.max_data_size {
            return Err(Error::BufferSize {
                expected: self.max_data_size,
                got: data.len(),
            });
        }
        self.sender.send_frame(&data[..self.max_data_size])
    }

    fn try_clone(&self) -> Result<Box<dyn FrameSink>> {
        Err(Error::CloneUnsupported("UdpSink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{RecvStep, ScriptedIo};
    use crate::channel::DatagramChannel;
    use crate::packetizer::Packetizer;

    fn config() -> Config {
        Config {
            max_payload: 16,
            ..Config::default()
        }
    }

    fn source(io: ScriptedIo, max_data_size: usize) -> UdpSource<ScriptedIo> {
        let config = config();
        let channel = DatagramChannel::with_io(io, None, &config.channel());
        let receiver = Receiver::with_channel(channel, &config).unwrap();
        UdpSource::from_receiver(receiver, max_data_size, Some(Duration::from_secs(5))).unwrap()
    }

    fn frame_datagrams(data: &[u8], frame_id: u32) -> RecvStep {
        let mut packetizer = Packetizer::new(16);
        let frame = packetizer.prepare(data, frame_id).unwrap();
        RecvStep::Datagrams(frame.iter().map(|f| f.to_datagram()).collect())
    }

    #[test]
    fn test_source_zero_pads_short_frame() {
        let io = ScriptedIo::new();
        io.push_recv(frame_datagrams(b"abc", 0));
        let mut source = source(io, 8);

        let mut out = [0xFFu8; 8];
        assert_eq!(source.generate(&mut out).unwrap(), Generated::Frame { len: 3 });
        assert_eq!(&out, b"abc\0\0\0\0\0");
    }

    #[test]
    fn test_source_truncates_long_frame() {
        let io = ScriptedIo::new();
        let data: Vec<u8> = (0..40u8).collect();
        io.push_recv(frame_datagrams(&data, 0));
        let mut source = source(io, 8);

        let mut out = [0u8; 8];
        assert_eq!(source.generate(&mut out).unwrap(), Generated::Frame { len: 40 });
        assert_eq!(&out[..], &data[..8]);
    }

    #[test]
    fn test_source_timeout_zero_fills() {
        let config = config();
        let channel = DatagramChannel::with_io(ScriptedIo::new(), None, &config.channel());
        let receiver = Receiver::with_channel(channel, &config).unwrap();
        let mut source =
            UdpSource::from_receiver(receiver, 4, Some(Duration::from_millis(20))).unwrap();

        let mut out = [7u8; 4];
        assert_eq!(source.generate(&mut out).unwrap(), Generated::Timeout);
        assert_eq!(out, [0u8; 4]);
    }

    #[test]
    fn test_source_after_stop() {
        let io = ScriptedIo::new();
        io.push_recv(frame_datagrams(b"last", 0));
        let mut source = source(io, 4);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while source.receiver().queued_frames() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        source.receiver().stop().unwrap();

        let mut out = [0u8; 4];
        assert_eq!(source.generate(&mut out).unwrap(), Generated::Frame { len: 4 });
        assert_eq!(&out, b"last");
        assert!(matches!(source.generate(&mut out), Err(Error::ReceiverStopped)));
    }

    #[test]
    fn test_source_rejects_wrong_buffer() {
        let mut source = source(ScriptedIo::new(), 8);
        let mut out = [0u8; 4];
        assert!(matches!(
            source.generate(&mut out),
            Err(Error::BufferSize { expected: 8, got: 4 })
        ));
    }

    #[test]
    fn test_sink_sends_fixed_size() {
        let io = ScriptedIo::new();
        let config = config();
        let channel = DatagramChannel::with_io(
            io.clone(),
            Some(SocketAddr::from(([127, 0, 0, 1], 5000))),
            &config.channel(),
        );
        let sender = Sender::with_channel(channel, &config).unwrap();
        let mut sink = UdpSink::from_sender(sender, 20);

        let data = [5u8; 32];
        let report = sink.send(&data).unwrap();
        assert_eq!(report.bytes, 20);
        assert_eq!(report.fragments, 2);

        assert!(matches!(
            sink.send(&data[..10]),
            Err(Error::BufferSize { expected: 20, got: 10 })
        ));
        assert_eq!(io.sent().len(), 2);
    }

    #[test]
    fn test_clone_unsupported() {
        let source = source(ScriptedIo::new(), 8);
        assert!(matches!(source.try_clone(), Err(Error::CloneUnsupported(_))));

        let config = config();
        let channel = DatagramChannel::with_io(ScriptedIo::new(), None, &config.channel());
        let sink = UdpSink::from_sender(Sender::with_channel(channel, &config).unwrap(), 8);
        assert!(matches!(sink.try_clone(), Err(Error::CloneUnsupported(_))));
    }
}
