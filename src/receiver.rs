//! 수신자
//!
//! - 백그라운드 워커 스레드가 채널과 조립기를 소유
//! - 완성된 프레임은 완료 큐로 (Mutex + Condvar)
//! - 소비자는 `pop_frame`으로 대기/타임아웃 수신
//! - 정지 후 재시작 가능

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::{BatchIo, DatagramChannel, NativeBatchIo, RecvBatch};
use crate::header::FragmentHeader;
use crate::reassembler::{FragmentOutcome, Reassembler};
use crate::stats::ReceiveStats;
use crate::{Config, Error, Result};

/// 완료 큐 상태
struct QueueState {
    frames: VecDeque<Bytes>,
    running: bool,
}

/// 워커와 소비자가 공유하는 상태
struct Shared {
    queue: Mutex<QueueState>,
    ready: Condvar,
    stop: AtomicBool,
    stats: Mutex<ReceiveStats>,
}

impl Shared {
    fn push(&self, frame: Bytes) {
        self.queue.lock().frames.push_back(frame);
        self.ready.notify_one();
    }

    fn set_running(&self, running: bool) {
        self.queue.lock().running = running;
        if !running {
            self.ready.notify_all();
        }
    }
}

/// 워커 종료 시 (패닉 포함) 소비자를 깨움
struct RunningGuard<'a>(&'a Shared);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

/// 워커 스레드가 소유하는 상태
struct Worker<B: BatchIo> {
    channel: DatagramChannel<B>,
    reassembler: Reassembler,
    batch: RecvBatch,
    frames_queued: u64,
}

impl<B: BatchIo> Worker<B> {
    fn run(&mut self, shared: &Shared) -> Result<()> {
        let _guard = RunningGuard(shared);

        while !shared.stop.load(Ordering::Acquire) {
            let received = match self.channel.recv_batch(&mut self.batch) {
                Ok(received) => received,
                Err(e) => {
                    error!("수신 루프 종료: {}", e);
                    return Err(e);
                }
            };
            if received == 0 {
                continue;
            }

            for datagram in self.batch.datagrams() {
                let Some((header, payload)) = FragmentHeader::split_datagram(datagram) else {
                    continue;
                };
                if let FragmentOutcome::Complete(frame) =
                    self.reassembler.add_fragment(header, payload)
                {
                    self.frames_queued += 1;
                    shared.push(frame.data);
                }
            }

            self.publish_stats(shared);
        }

        self.publish_stats(shared);
        Ok(())
    }

    fn publish_stats(&self, shared: &Shared) {
        *shared.stats.lock() = ReceiveStats {
            frames_queued: self.frames_queued,
            channel: self.channel.stats(),
            reassembly: self.reassembler.stats(),
        };
    }
}

type WorkerHandle<B> = JoinHandle<(Worker<B>, Result<()>)>;

/// 워커 소유권 슬롯 (정지 중이면 `idle`, 실행 중이면 `handle`)
struct WorkerSlot<B: BatchIo> {
    idle: Option<Worker<B>>,
    handle: Option<WorkerHandle<B>>,
}

impl<B: BatchIo> WorkerSlot<B> {
    /// 끝난 워커를 합류시키고 워커를 `idle`로 되돌림
    fn join(&mut self, handle: WorkerHandle<B>) -> Result<()> {
        match handle.join() {
            Ok((worker, result)) => {
                self.idle = Some(worker);
                result
            }
            Err(_) => Err(Error::WorkerPanicked),
        }
    }
}

/// 수신자
///
/// `start`/`stop`/`pop_frame` 모두 `&self`를 받으므로 `Arc<Receiver>`로 공유해
/// 한 스레드는 꺼내고 다른 스레드는 정지시킬 수 있다.
pub struct Receiver<B: BatchIo + 'static = NativeBatchIo> {
    shared: Arc<Shared>,
    worker: Mutex<WorkerSlot<B>>,
    local_addr: Option<SocketAddr>,
}

impl Receiver<NativeBatchIo> {
    /// `port`에 바인딩 (시작은 `start`에서)
    pub fn bind(port: u16, config: &Config) -> Result<Self> {
        config.validate()?;
        let channel = DatagramChannel::bind(port, &config.channel())?;
        Self::with_channel(channel, config)
    }
}

impl<B: BatchIo + 'static> Receiver<B> {
    /// 이미 만든 채널로 수신자 생성
    pub fn with_channel(channel: DatagramChannel<B>, config: &Config) -> Result<Self> {
        config.validate()?;
        let local_addr = channel.local_addr().ok();

        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    frames: VecDeque::new(),
                    running: false,
                }),
                ready: Condvar::new(),
                stop: AtomicBool::new(false),
                stats: Mutex::new(ReceiveStats::default()),
            }),
            worker: Mutex::new(WorkerSlot {
                idle: Some(Worker {
                    channel,
                    reassembler: Reassembler::new(config.reassembly()),
                    batch: RecvBatch::new(config.recv_batch_size, config.rx_slot_size()),
                    frames_queued: 0,
                }),
                handle: None,
            }),
            local_addr,
        })
    }

    /// 수신 워커 시작 (이미 실행 중이면 아무것도 안 함)
    ///
    /// 워커가 치명적 에러로 먼저 끝났다면 합류시킨 뒤 그 에러를 반환한다.
    /// 워커는 회수되므로 다음 `start`는 다시 시작한다.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.worker.lock();

        if let Some(handle) = slot.handle.take() {
            if !handle.is_finished() && self.is_running() {
                slot.handle = Some(handle);
                return Ok(());
            }
            slot.join(handle)?;
        }

        let mut worker = slot.idle.take().ok_or(Error::WorkerPanicked)?;

        self.shared.stop.store(false, Ordering::Release);
        self.shared.set_running(true);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("fdp-rx".into())
            .spawn(move || {
                let result = worker.run(&shared);
                (worker, result)
            });

        match spawned {
            Ok(handle) => {
                slot.handle = Some(handle);
                info!("FDP 수신 시작: {:?}", self.local_addr);
                Ok(())
            }
            Err(e) => {
                self.shared.set_running(false);
                Err(e.into())
            }
        }
    }

    /// 워커 정지 후 합류
    ///
    /// 워커가 치명적 에러로 먼저 끝났다면 그 에러를 반환한다.
    /// 반환 뒤에는 큐에 새 프레임이 들어오지 않고, `pop_frame`에서 대기 중인
    /// 소비자는 모두 깨어난다.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(handle) = slot.handle.take() else {
            return Ok(());
        };

        self.shared.stop.store(true, Ordering::Release);

        let result = slot.join(handle);
        self.shared.set_running(false);

        if !matches!(result, Err(Error::WorkerPanicked)) {
            info!("FDP 수신 정지: {}", self.shared.stats.lock().summary());
        }
        result
    }

    /// 완성 프레임 하나 꺼내기
    ///
    /// - `None`: 프레임이 오거나 수신자가 멈출 때까지 대기
    /// - `Some(Duration::ZERO)`: 한 번만 확인
    /// - `Some(d)`: 최대 `d`만큼 대기
    ///
    /// 정지 후에도 큐에 남은 프레임은 반환된다.
    pub fn pop_frame(&self, timeout: Option<Duration>) -> Option<Bytes> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut queue = self.shared.queue.lock();

        loop {
            if let Some(frame) = queue.frames.pop_front() {
                return Some(frame);
            }
            if !queue.running {
                return None;
            }

            match deadline {
                None => self.shared.ready.wait(&mut queue),
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut queue, deadline).timed_out() {
                        return queue.frames.pop_front();
                    }
                }
            }
        }
    }

    /// 대기 없이 꺼내기
    pub fn try_pop_frame(&self) -> Option<Bytes> {
        self.shared.queue.lock().frames.pop_front()
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running
    }

    /// 큐에 쌓인 프레임 수
    pub fn queued_frames(&self) -> usize {
        self.shared.queue.lock().frames.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 통계 스냅샷 (워커가 배치마다 갱신)
    pub fn stats(&self) -> ReceiveStats {
        self.shared.stats.lock().clone()
    }
}

impl<B: BatchIo + 'static> Drop for Receiver<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("수신 워커 종료 에러: {}", e);
        }
        debug!("FDP 수신자 해제");
    }
}
