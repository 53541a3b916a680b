//! 127.0.0.1 위의 송수신 통합 테스트

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use fdp::{Config, FrameSink, FrameSource, Generated, Receiver, Sender, UdpSink, UdpSource};

fn loopback_target(receiver_addr: Option<SocketAddr>) -> SocketAddr {
    let port = receiver_addr.expect("receiver must be bound").port();
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn random_frame(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

#[test]
fn test_frames_arrive_intact() {
    let config = Config::default();
    let receiver = Receiver::bind(0, &config).unwrap();
    receiver.start().unwrap();

    let mut sender = Sender::connect(loopback_target(receiver.local_addr()), &config).unwrap();

    // 빈 프레임, 단일 프래그먼트, 나누어떨어지는 크기, 여러 프래그먼트
    let frames = vec![
        Vec::new(),
        random_frame(100),
        random_frame(1400 * 3),
        random_frame(3500),
        random_frame(20_000),
    ];

    for frame in &frames {
        sender.send_frame(frame).unwrap();
        let received = receiver
            .pop_frame(Some(Duration::from_secs(5)))
            .expect("frame should arrive over loopback");
        assert_eq!(&received[..], &frame[..]);
    }

    assert_eq!(sender.stats().frames_sent, frames.len() as u64);

    receiver.stop().unwrap();
    let stats = receiver.stats();
    assert_eq!(stats.frames_queued, frames.len() as u64);
    assert_eq!(stats.reassembly.rejected, 0);
}

#[test]
fn test_custom_payload_size() {
    let config = Config {
        max_payload: 512,
        ..Config::default()
    };
    let receiver = Receiver::bind(0, &config).unwrap();
    receiver.start().unwrap();

    let mut sender = Sender::connect(loopback_target(receiver.local_addr()), &config).unwrap();
    let data = random_frame(5000);
    let report = sender.send_frame(&data).unwrap();
    assert_eq!(report.fragments, 10);

    let received = receiver.pop_frame(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&received[..], &data[..]);
}

#[test]
fn test_duplicate_bind_fails() {
    let config = Config::default();
    let first = Receiver::bind(0, &config).unwrap();
    let port = first.local_addr().unwrap().port();

    assert!(Receiver::bind(port, &config).is_err());
}

#[test]
fn test_pop_frame_after_stop_returns_none() {
    let config = Config::low_latency();
    let receiver = Receiver::bind(0, &config).unwrap();
    receiver.start().unwrap();

    assert!(receiver.pop_frame(Some(Duration::from_millis(20))).is_none());

    receiver.stop().unwrap();
    assert!(!receiver.is_running());
    assert!(receiver.pop_frame(None).is_none());
}

#[test]
fn test_source_and_sink() {
    let config = Config::default();
    let mut source = UdpSource::bind(64, 0, Some(Duration::from_secs(5)), &config).unwrap();
    let target = loopback_target(source.receiver().local_addr());
    let mut sink = UdpSink::connect(32, target, &config).unwrap();

    assert_eq!(sink.max_data_size(), 32);
    assert_eq!(source.max_data_size(), 64);

    let data = random_frame(40);
    sink.send(&data).unwrap();

    let mut out = vec![0xFFu8; 64];
    assert_eq!(source.generate(&mut out).unwrap(), Generated::Frame { len: 32 });
    assert_eq!(&out[..32], &data[..32]);
    assert!(out[32..].iter().all(|&b| b == 0));

    assert!(source.try_clone().is_err());
    assert!(sink.try_clone().is_err());
}
