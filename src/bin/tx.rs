//! FDP 연속 송신기
//!
//! 고정 크기 버퍼를 쉬지 않고 프레임으로 보내며 1초마다 처리율을 출력한다.
//!
//! 사용법:
//!   cargo run --release --bin fdp-tx -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin fdp-tx -- --ip 127.0.0.1 --port 9999 --size 65536

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fdp::{Config, FrameSink, UdpSink};

/// 송신기 설정
struct TxOptions {
    ip: IpAddr,
    port: u16,
    data_size: usize,
    config: Config,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            ip: IpAddr::from([127, 0, 0, 1]),
            port: 9999,
            data_size: 2048,
            config: Config::default(),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn parse_args() -> Result<TxOptions, BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = TxOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--ip" | "-i", Some(v)) => {
                options.ip = v.parse()?;
                i += 1;
            }
            ("--port" | "-p", Some(v)) => {
                options.port = v.parse()?;
                i += 1;
            }
            ("--size" | "-d", Some(v)) => {
                options.data_size = v.parse()?;
                i += 1;
            }
            ("--payload", Some(v)) => {
                options.config.max_payload = v.parse()?;
                i += 1;
            }
            ("--socket-buffer", Some(v)) => {
                options.config.socket_buffer_size = v.parse()?;
                i += 1;
            }
            ("--high-throughput", _) => {
                options.config = Config::high_throughput();
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"FDP TX - 연속 프레임 송신기

사용법:
  cargo run --release --bin fdp-tx -- [OPTIONS]

옵션:
  -i, --ip <IP>             목적지 IP (기본: 127.0.0.1)
  -p, --port <PORT>         목적지 포트 (기본: 9999)
  -d, --size <BYTES>        프레임 크기 (기본: 2048)
  --payload <BYTES>         패킷당 최대 페이로드 (기본: 1400, 수신측과 같아야 함)
  --socket-buffer <BYTES>   커널 송신 버퍼 크기 (기본: 32MB)
  --high-throughput         고처리율 프리셋
  -h, --help                이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            (other, _) => return Err(format!("알 수 없는 인자: {}", other).into()),
        }
        i += 1;
    }

    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;
    let dest = SocketAddr::new(options.ip, options.port);

    info!("FDP TX starting...");
    info!("Destination: {}", dest);
    info!("Frame size: {} bytes", options.data_size);
    info!("Max payload: {} bytes", options.config.max_payload);

    let mut sink = UdpSink::connect(options.data_size, dest, &options.config)?;

    let running = Arc::new(AtomicBool::new(true));
    let bytes_sent = Arc::new(AtomicU64::new(0));
    let frames_sent = Arc::new(AtomicU64::new(0));

    // ─────────────────────────────────────────────────────────────────
    // 송신 루프: 블로킹 엔진은 전용 스레드에서
    // ─────────────────────────────────────────────────────────────────
    let send_task = {
        let running = running.clone();
        let bytes_sent = bytes_sent.clone();
        let frames_sent = frames_sent.clone();
        let data_size = options.data_size;

        tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; data_size];
            let mut counter = 0u8;

            while running.load(Ordering::Relaxed) {
                buffer.fill(counter);
                counter = counter.wrapping_add(1);

                match sink.send(&buffer) {
                    Ok(report) => {
                        bytes_sent.fetch_add(report.bytes as u64, Ordering::Relaxed);
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("Send failed: {}", e),
                }
            }

            sink.sender().stats()
        })
    };

    // ─────────────────────────────────────────────────────────────────
    // 1초마다 처리율 보고, Ctrl-C로 종료
    // ─────────────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut last_bytes = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = bytes_sent.load(Ordering::Relaxed);
                let mbps = (current - last_bytes) as f64 * 8.0 / 1_000_000.0;
                last_bytes = current;
                info!(
                    "[TX] Throughput: {:.2} Mbps | Frames: {}",
                    mbps,
                    frames_sent.load(Ordering::Relaxed)
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping...");
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let stats = send_task.await?;

    info!("TX finished");
    info!("  {}", stats.summary());

    Ok(())
}
