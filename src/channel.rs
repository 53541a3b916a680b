//! 데이터그램 채널
//!
//! - UDP 소켓 하나를 소유
//! - 커널 버퍼 확대 (실패해도 치명적이지 않음)
//! - 배치 송수신: 시스템 콜 한 번에 여러 데이터그램
//! - 부분 전송 재개, EINTR/EAGAIN 재시도
//!
//! 배치 시스템 콜은 [`BatchIo`]로 추상화되어 있어, `sendmmsg`/`recvmmsg`가 없는
//! 플랫폼에서는 데이터그램 단위 루프로 대체된다.

use std::io::{self, IoSlice};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::packetizer::PreparedFrame;
use crate::stats::ChannelStats;
use crate::{Error, Result, HEADER_SIZE};

/// sendmmsg 한 번에 넘기는 최대 메시지 수 (UIO_MAXIOV)
const MAX_MESSAGES_PER_CALL: usize = 1024;

/// 배치 송수신 기능
///
/// 구현체는 한 번의 커널 호출로 처리할 수 있는 만큼만 처리하고 개수를 반환한다.
/// 재시도/재개 정책은 [`DatagramChannel`]이 담당한다.
pub trait BatchIo: Send {
    /// `frame`의 `from`번째부터 전송. 전송된 데이터그램 수 반환.
    fn send_some(
        &mut self,
        frame: &PreparedFrame<'_>,
        from: usize,
        dest: &SocketAddr,
    ) -> io::Result<usize>;

    /// `batch`의 빈 슬롯에 수신. 수신된 데이터그램 수 반환.
    /// 타임아웃이면 `WouldBlock`/`TimedOut` 에러.
    fn recv_some(&mut self, batch: &mut RecvBatch) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// 수신 버퍼 풀
///
/// 고정 크기 슬롯을 하나의 연속 버퍼에 배치한다.
pub struct RecvBatch {
    buffer: Vec<u8>,
    lens: Vec<usize>,
    slot_size: usize,
    received: usize,
}

impl RecvBatch {
    pub fn new(batch_size: usize, slot_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: vec![0u8; batch_size * slot_size],
            lens: vec![0; batch_size],
            slot_size,
            received: 0,
        }
    }

    /// 슬롯 수
    pub fn capacity(&self) -> usize {
        self.lens.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// 채워진 슬롯 수
    pub fn len(&self) -> usize {
        self.received
    }

    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    /// 남은 빈 슬롯 수
    pub fn remaining(&self) -> usize {
        self.capacity() - self.received
    }

    pub fn clear(&mut self) {
        self.received = 0;
    }

    /// 다음 빈 슬롯
    pub fn next_slot_mut(&mut self) -> Option<&mut [u8]> {
        if self.received >= self.capacity() {
            return None;
        }
        let start = self.received * self.slot_size;
        Some(&mut self.buffer[start..start + self.slot_size])
    }

    /// 다음 빈 슬롯에 `len` 바이트가 채워졌음을 기록
    pub fn commit(&mut self, len: usize) {
        if self.received < self.capacity() {
            self.lens[self.received] = len.min(self.slot_size);
            self.received += 1;
        }
    }

    /// 데이터그램을 다음 슬롯에 복사 (슬롯보다 크면 잘림)
    pub fn push(&mut self, datagram: &[u8]) -> bool {
        let Some(slot) = self.next_slot_mut() else {
            return false;
        };
        let len = datagram.len().min(slot.len());
        slot[..len].copy_from_slice(&datagram[..len]);
        self.commit(len);
        true
    }

    /// 수신된 `index`번째 데이터그램
    pub fn datagram(&self, index: usize) -> Option<&[u8]> {
        if index >= self.received {
            return None;
        }
        let start = index * self.slot_size;
        Some(&self.buffer[start..start + self.lens[index]])
    }

    /// 헤더 크기 이상인 데이터그램만 순회
    pub fn datagrams(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.received)
            .filter_map(|index| self.datagram(index))
            .filter(|datagram| datagram.len() >= HEADER_SIZE)
    }

    /// 헤더보다 짧은 데이터그램 수
    pub fn malformed(&self) -> usize {
        self.lens[..self.received]
            .iter()
            .filter(|&&len| len < HEADER_SIZE)
            .count()
    }
}

/// 이 플랫폼의 기본 배치 구현
#[cfg(target_os = "linux")]
pub type NativeBatchIo = MmsgBatchIo;

/// 이 플랫폼의 기본 배치 구현
#[cfg(not(target_os = "linux"))]
pub type NativeBatchIo = LoopBatchIo;

/// Linux `sendmmsg`/`recvmmsg` 기반 배치 구현
#[cfg(target_os = "linux")]
pub struct MmsgBatchIo {
    socket: UdpSocket,
    send_iovecs: Vec<[libc::iovec; 2]>,
    send_msgs: Vec<libc::mmsghdr>,
    recv_iovecs: Vec<libc::iovec>,
    recv_msgs: Vec<libc::mmsghdr>,
}

// SAFETY: iovec/mmsghdr 안의 포인터는 한 번의 시스템 콜 동안만 유효하며
// 호출마다 다시 채워진다. 호출 밖에서는 절대 역참조되지 않는다.
#[cfg(target_os = "linux")]
unsafe impl Send for MmsgBatchIo {}

#[cfg(target_os = "linux")]
impl MmsgBatchIo {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            send_iovecs: Vec::new(),
            send_msgs: Vec::new(),
            recv_iovecs: Vec::new(),
            recv_msgs: Vec::new(),
        }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

#[cfg(target_os = "linux")]
impl BatchIo for MmsgBatchIo {
    fn send_some(
        &mut self,
        frame: &PreparedFrame<'_>,
        from: usize,
        dest: &SocketAddr,
    ) -> io::Result<usize> {
        use std::os::unix::io::AsRawFd;

        let count = frame.len().saturating_sub(from).min(MAX_MESSAGES_PER_CALL);
        if count == 0 {
            return Ok(0);
        }

        let addr = SockAddr::from(*dest);

        self.send_iovecs.clear();
        for fragment in frame.iter_from(from).take(count) {
            let header = fragment.header_bytes();
            let payload = fragment.payload();
            self.send_iovecs.push([
                libc::iovec {
                    iov_base: header.as_ptr() as *mut libc::c_void,
                    iov_len: header.len(),
                },
                libc::iovec {
                    iov_base: payload.as_ptr() as *mut libc::c_void,
                    iov_len: payload.len(),
                },
            ]);
        }

        // iovec 벡터가 다 채워진 뒤에 포인터를 잡아야 재할당으로 무효화되지 않음
        self.send_msgs.clear();
        for iov in self.send_iovecs.iter_mut() {
            // SAFETY: mmsghdr는 0으로 초기화해도 유효한 C 구조체
            let mut msg: libc::mmsghdr = unsafe { std::mem::zeroed() };
            msg.msg_hdr.msg_name = addr.as_ptr() as *mut libc::c_void;
            msg.msg_hdr.msg_namelen = addr.len();
            msg.msg_hdr.msg_iov = iov.as_mut_ptr();
            msg.msg_hdr.msg_iovlen = 2;
            self.send_msgs.push(msg);
        }

        // SAFETY: 모든 포인터는 frame/addr/self가 살아 있는 이 호출 동안 유효
        let ret = unsafe {
            libc::sendmmsg(
                self.socket.as_raw_fd(),
                self.send_msgs.as_mut_ptr(),
                count as libc::c_uint,
                0,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn recv_some(&mut self, batch: &mut RecvBatch) -> io::Result<usize> {
        use std::os::unix::io::AsRawFd;

        let count = batch.remaining();
        if count == 0 {
            return Ok(0);
        }

        let slot_size = batch.slot_size();
        let first = batch.len();

        self.recv_iovecs.clear();
        for index in 0..count {
            let start = (first + index) * slot_size;
            self.recv_iovecs.push(libc::iovec {
                iov_base: batch.buffer[start..].as_mut_ptr() as *mut libc::c_void,
                iov_len: slot_size,
            });
        }

        self.recv_msgs.clear();
        for iov in self.recv_iovecs.iter_mut() {
            // SAFETY: mmsghdr는 0으로 초기화해도 유효한 C 구조체
            let mut msg: libc::mmsghdr = unsafe { std::mem::zeroed() };
            msg.msg_hdr.msg_iov = iov as *mut libc::iovec;
            msg.msg_hdr.msg_iovlen = 1;
            self.recv_msgs.push(msg);
        }

        // 첫 데이터그램까지만 블로킹(SO_RCVTIMEO 적용), 이후는 있는 만큼만
        // SAFETY: 각 iovec은 batch.buffer의 서로 겹치지 않는 슬롯을 가리킴
        let ret = unsafe {
            libc::recvmmsg(
                self.socket.as_raw_fd(),
                self.recv_msgs.as_mut_ptr(),
                count as libc::c_uint,
                libc::MSG_WAITFORONE as _,
                std::ptr::null_mut(),
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let received = ret as usize;
        for msg in &self.recv_msgs[..received] {
            batch.commit(msg.msg_len as usize);
        }
        Ok(received)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// 데이터그램 단위 루프 구현 (배치 시스템 콜이 없는 플랫폼용)
pub struct LoopBatchIo {
    socket: UdpSocket,
}

impl LoopBatchIo {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl BatchIo for LoopBatchIo {
    fn send_some(
        &mut self,
        frame: &PreparedFrame<'_>,
        from: usize,
        dest: &SocketAddr,
    ) -> io::Result<usize> {
        let addr = SockAddr::from(*dest);
        let socket = SockRef::from(&self.socket);
        let mut sent = 0;

        for fragment in frame.iter_from(from) {
            let bufs = [
                IoSlice::new(fragment.header_bytes()),
                IoSlice::new(fragment.payload()),
            ];
            match socket.send_to_vectored(&bufs, &addr) {
                Ok(_) => sent += 1,
                // 일부라도 보냈으면 개수를 먼저 보고하고, 에러는 다음 호출에서 다시 만남
                Err(_) if sent > 0 => break,
                Err(e) => return Err(e),
            }
        }

        Ok(sent)
    }

    fn recv_some(&mut self, batch: &mut RecvBatch) -> io::Result<usize> {
        let Some(slot) = batch.next_slot_mut() else {
            return Ok(0);
        };
        let (len, _) = self.socket.recv_from(slot)?;
        batch.commit(len);
        Ok(1)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// 데이터그램 채널
pub struct DatagramChannel<B: BatchIo = NativeBatchIo> {
    io: B,
    destination: Option<SocketAddr>,
    backoff: Backoff,
    stats: ChannelStats,
}

impl DatagramChannel<NativeBatchIo> {
    /// 수신 모드: 모든 인터페이스의 `port`에 바인딩
    pub fn bind(port: u16, config: &ChannelConfig) -> Result<Self> {
        Self::bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port), config)
    }

    /// 수신 모드: 지정한 주소에 바인딩
    pub fn bind_addr(addr: SocketAddr, config: &ChannelConfig) -> Result<Self> {
        let socket = open_socket(&addr, config)?;
        socket.bind(&SockAddr::from(addr))?;

        let socket: UdpSocket = socket.into();
        info!("FDP 채널 바인딩: {}", socket.local_addr()?);

        Ok(Self::with_io(NativeBatchIo::new(socket), None, config))
    }

    /// 송신 모드: 고정 목적지
    pub fn connect(dest: SocketAddr, config: &ChannelConfig) -> Result<Self> {
        let socket = open_socket(&dest, config)?;
        let local = match dest {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        };
        socket.bind(&SockAddr::from(local))?;

        let socket: UdpSocket = socket.into();
        info!("FDP 채널 목적지: {} (local {})", dest, socket.local_addr()?);

        Ok(Self::with_io(NativeBatchIo::new(socket), Some(dest), config))
    }

    /// 실제 적용된 커널 (송신, 수신) 버퍼 크기
    pub fn effective_buffer_sizes(&self) -> io::Result<(usize, usize)> {
        let socket = SockRef::from(self.io.socket());
        Ok((socket.send_buffer_size()?, socket.recv_buffer_size()?))
    }
}

impl<B: BatchIo> DatagramChannel<B> {
    /// 임의의 배치 구현으로 채널 생성
    pub fn with_io(io: B, destination: Option<SocketAddr>, config: &ChannelConfig) -> Self {
        Self {
            io,
            destination,
            backoff: Backoff::new(config.backoff),
            stats: ChannelStats::default(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.io.local_addr()?)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.destination
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.clone()
    }

    pub fn io(&self) -> &B {
        &self.io
    }

    /// 프레임의 모든 프래그먼트를 전송
    ///
    /// 부분 전송이면 남은 프래그먼트부터 재개하고, EINTR은 즉시, 송신 버퍼 가득 참은
    /// 백오프 후 재시도한다. 그 밖의 에러는 남은 프래그먼트를 버리고
    /// [`Error::BatchAborted`]로 전송된 개수를 알린다.
    pub fn send_batch(&mut self, frame: &PreparedFrame<'_>) -> Result<usize> {
        let dest = self
            .destination
            .ok_or_else(|| Error::InvalidAddress("송신 목적지가 설정되지 않음".into()))?;

        let total = frame.len();
        let mut sent = 0;
        self.backoff.reset();

        while sent < total {
            match self.io.send_some(frame, sent, &dest) {
                Ok(0) => {
                    self.stats.would_block_retries += 1;
                    self.backoff.wait();
                }
                Ok(n) => {
                    let n = n.min(total - sent);
                    sent += n;
                    self.stats.send_calls += 1;
                    self.stats.datagrams_sent += n as u64;
                    self.backoff.reset();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.stats.interrupted_retries += 1;
                }
                Err(e) if is_send_buffer_full(&e) => {
                    self.stats.would_block_retries += 1;
                    self.backoff.wait();
                }
                Err(e) => {
                    warn!(
                        "프레임 {} 전송 중단: {}/{} 프래그먼트 전송 후 에러: {}",
                        frame.frame_id(),
                        sent,
                        total,
                        e
                    );
                    return Err(Error::BatchAborted {
                        sent,
                        total,
                        source: e,
                    });
                }
            }
        }

        Ok(sent)
    }

    /// 배치 수신
    ///
    /// 타임아웃이면 `Ok(0)`을 반환하므로 호출자가 다시 폴링하면 된다.
    pub fn recv_batch(&mut self, batch: &mut RecvBatch) -> Result<usize> {
        batch.clear();

        loop {
            match self.io.recv_some(batch) {
                Ok(received) => {
                    let malformed = batch.malformed();
                    if malformed > 0 {
                        trace!("헤더보다 짧은 데이터그램 {}개 무시", malformed);
                    }
                    if received > 0 {
                        self.stats.recv_calls += 1;
                        self.stats.datagrams_received += received as u64;
                        self.stats.malformed_datagrams += malformed as u64;
                    }
                    return Ok(received);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.stats.interrupted_retries += 1;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// 소켓 생성 및 튜닝
fn open_socket(addr: &SocketAddr, config: &ChannelConfig) -> Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))?;

    tune_buffers(&socket, config.socket_buffer_size);

    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.set_read_timeout(config.recv_timeout)?;

    Ok(socket)
}

/// 커널 버퍼 확대 (실패하거나 잘려도 경고만)
fn tune_buffers(socket: &Socket, size: usize) {
    if size == 0 {
        return;
    }

    if let Err(e) = socket.set_send_buffer_size(size) {
        warn!("SO_SNDBUF {} bytes 설정 실패: {}", size, e);
    }
    if let Err(e) = socket.set_recv_buffer_size(size) {
        warn!("SO_RCVBUF {} bytes 설정 실패: {}", size, e);
    }

    match socket.recv_buffer_size() {
        Ok(actual) if actual < size => warn!(
            "커널 수신 버퍼가 {} KB로 제한됨 (요청 {} KB, net.core.rmem_max 확인 필요)",
            actual / 1024,
            size / 1024
        ),
        Ok(actual) => debug!("커널 수신 버퍼: {} KB", actual / 1024),
        Err(e) => warn!("SO_RCVBUF 조회 실패: {}", e),
    }
}

/// 송신 버퍼가 일시적으로 가득 찬 상태인지
fn is_send_buffer_full(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::ENOBUFS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
