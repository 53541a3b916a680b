//! FDP 연속 수신기
//!
//! 프레임을 계속 꺼내며 1초마다 처리율, 프레임 수, 도착 간격을 출력한다.
//!
//! 사용법:
//!   cargo run --release --bin fdp-rx -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin fdp-rx -- --port 9999 --size 65536

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fdp::stats::{JitterMeter, ThroughputMeter};
use fdp::{Config, FrameSource, Generated, UdpSource};

/// 수신기 설정
struct RxOptions {
    port: u16,
    data_size: usize,
    timeout: Duration,
    config: Config,
}

impl Default for RxOptions {
    fn default() -> Self {
        Self {
            port: 9999,
            data_size: 2048,
            timeout: Duration::from_millis(100),
            config: Config::default(),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn parse_args() -> Result<RxOptions, BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = RxOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--port" | "-p", Some(v)) => {
                options.port = v.parse()?;
                i += 1;
            }
            ("--size" | "-d", Some(v)) => {
                options.data_size = v.parse()?;
                i += 1;
            }
            ("--timeout-ms", Some(v)) => {
                options.timeout = Duration::from_millis(v.parse()?);
                i += 1;
            }
            ("--payload", Some(v)) => {
                options.config.max_payload = v.parse()?;
                i += 1;
            }
            ("--pending", Some(v)) => {
                options.config.max_pending_frames = v.parse()?;
                i += 1;
            }
            ("--low-latency", _) => {
                options.config = Config::low_latency();
            }
            ("--high-throughput", _) => {
                options.config = Config::high_throughput();
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"FDP RX - 연속 프레임 수신기

사용법:
  cargo run --release --bin fdp-rx -- [OPTIONS]

옵션:
  -p, --port <PORT>         수신 포트 (기본: 9999)
  -d, --size <BYTES>        프레임 버퍼 크기 (기본: 2048)
  --timeout-ms <MS>         프레임 대기 타임아웃 (기본: 100)
  --payload <BYTES>         패킷당 최대 페이로드 (기본: 1400, 송신측과 같아야 함)
  --pending <N>             동시에 조립 중인 최대 프레임 수 (기본: 10)
  --low-latency             저지연 프리셋
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

/// 수신 측정값
#[derive(Default)]
struct Meters {
    throughput: ThroughputMeter,
    jitter: JitterMeter,
    timeouts: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;

    info!("FDP RX starting...");
    info!("Port: {}", options.port);
    info!("Frame size: {} bytes", options.data_size);
    info!("Max payload: {} bytes", options.config.max_payload);

    let mut source = UdpSource::bind(
        options.data_size,
        options.port,
        Some(options.timeout),
        &options.config,
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let meters = Arc::new(Mutex::new(Meters::default()));

    // ─────────────────────────────────────────────────────────────────
    // 수신 루프: 타임아웃마다 정지 플래그 확인
    // ─────────────────────────────────────────────────────────────────
    let recv_task = {
        let running = running.clone();
        let meters = meters.clone();
        let data_size = options.data_size;

        tokio::task::spawn_blocking(move || -> fdp::Result<fdp::ReceiveStats> {
            let mut buffer = vec![0u8; data_size];

            while running.load(Ordering::Relaxed) {
                match source.generate(&mut buffer)? {
                    Generated::Frame { len } => {
                        let mut meters = meters.lock();
                        meters.throughput.record(len.min(data_size));
                        meters.jitter.record(Instant::now());
                    }
                    Generated::Timeout => meters.lock().timeouts += 1,
                }
            }

            let receiver = source.receiver();
            receiver.stop()?;
            Ok(receiver.stats())
        })
    };

    // ─────────────────────────────────────────────────────────────────
    // 1초마다 상태 보고, Ctrl-C로 종료
    // ─────────────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut last_bytes = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let meters = meters.lock();
                let mbps = (meters.throughput.total_bytes - last_bytes) as f64 * 8.0 / 1_000_000.0;
                last_bytes = meters.throughput.total_bytes;
                info!(
                    "[RX] Throughput: {:.2} Mbps | Frames: {} | Jitter: {:.3} ms | Timeouts: {}",
                    mbps,
                    meters.throughput.total_frames,
                    meters.jitter.jitter_ms(),
                    meters.timeouts
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping...");
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let stats = recv_task.await??;

    let meters = meters.lock();
    info!("RX finished");
    info!("  Frames: {}", meters.throughput.total_frames);
    info!(
        "  Average: {:.2} Mbps",
        meters.throughput.overall_throughput() * 8.0 / 1_000_000.0
    );
    info!("  {}", stats.summary());

    Ok(())
}
