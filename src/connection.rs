//! P2P 연결 상태 머신
//!
//! 연결 하나의 생명주기(연결 수립 → 데이터 전송 → 종료)를 소유함.
//! ISS(개시측)와 IRS(응답측) 역할 모두 같은 전이 테이블로 구동되며,
//! 역할은 어느 프레임 타입이 도착하는지로 구분됨.
//!
//! 테이블에 없는 (상태, 프레임) 조합은 로그만 남기고 무시 —
//! 손실 채널의 중복/미아 프레임이 상태를 오염시키면 안 됨

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::arq::{self, AckSignal, ArqOutcome};
use crate::config::Config;
use crate::frame::{Frame, FrameType};
use crate::modem::{LinkQuality, Modem, TxMode};
use crate::stats::SessionStats;
use crate::{Error, Result};

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Connecting,
    ConnectSent,
    ConnectAckSent,
    Connected,
    HeartbeatSent,
    HeartbeatAckSent,
    PayloadSent,
    Disconnecting,
    Disconnected,
    Failed,
}

impl State {
    /// 터미널 상태 여부 (되돌릴 수 없음)
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Disconnected | State::Failed)
    }

    /// 상태 이름
    pub fn name(&self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Connecting => "CONNECTING",
            State::ConnectSent => "CONNECT_SENT",
            State::ConnectAckSent => "CONNECT_ACK_SENT",
            State::Connected => "CONNECTED",
            State::HeartbeatSent => "HEARTBEAT_SENT",
            State::HeartbeatAckSent => "HEARTBEAT_ACK_SENT",
            State::PayloadSent => "PAYLOAD_SENT",
            State::Disconnecting => "DISCONNECTING",
            State::Disconnected => "DISCONNECTED",
            State::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 세션 실패 사유 (애플리케이션에 노출되는 이유 코드)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// 재시도 예산 소진
    RetryExhausted,

    /// 세션 상한 타임아웃 (상대방 소실 백스톱)
    SessionTimeout,
}

/// 애플리케이션으로 흘러가는 연결 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// 연결 수립됨
    Connected,

    /// 검증된 페이로드 청크 수신
    DataReceived(Bytes),

    /// 정상 종료됨
    Disconnected,

    /// 세션 실패 (터미널)
    Failed(FailReason),
}

/// 이벤트 수신 채널 (수신 큐 역할, FIFO)
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// 전이 핸들러 (컴파일 타임에 결정되는 태그)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ConnectedIss,
    ConnectedIrs,
    ReceivedData,
    AdvanceQueue,
    ReceivedHeartbeat,
    ReceivedHeartbeatAck,
    ReceivedDisconnect,
    ReceivedDisconnectAck,
}

/// 정적 전이 테이블: (현재 상태, 수신 프레임) -> 핸들러
///
/// 여기 없는 조합은 전부 no-op
const TRANSITIONS: &[(State, FrameType, Action)] = &[
    (State::New, FrameType::Connect, Action::ConnectedIrs),
    (State::Connecting, FrameType::ConnectAck, Action::ConnectedIss),
    (State::Connected, FrameType::Connect, Action::ConnectedIrs),
    (State::Connected, FrameType::ConnectAck, Action::ConnectedIss),
    (State::Connected, FrameType::Payload, Action::ReceivedData),
    (State::Connected, FrameType::Heartbeat, Action::ReceivedHeartbeat),
    (State::Connected, FrameType::Disconnect, Action::ReceivedDisconnect),
    (State::HeartbeatSent, FrameType::HeartbeatAck, Action::ReceivedHeartbeatAck),
    (State::PayloadSent, FrameType::PayloadAck, Action::AdvanceQueue),
    (State::Disconnecting, FrameType::DisconnectAck, Action::ReceivedDisconnectAck),
    (State::Disconnected, FrameType::Disconnect, Action::ReceivedDisconnect),
    (State::Disconnected, FrameType::DisconnectAck, Action::ReceivedDisconnectAck),
];

fn lookup(state: State, frame_type: FrameType) -> Option<Action> {
    TRANSITIONS
        .iter()
        .find(|(s, f, _)| *s == state && *f == frame_type)
        .map(|(_, _, action)| *action)
}

/// P2P 연결 하나
///
/// 상태/큐/카운터는 이 연결 전용이며 자기 연산을 통해서만 변경됨
pub struct Connection {
    config: Config,
    modem: Arc<dyn Modem>,
    session_id: u8,
    origin: String,
    destination: String,

    /// 전송 태스크에 넘겨줄 자기 참조
    me: Weak<Connection>,

    state: Mutex<State>,
    is_initiator: AtomicBool,

    /// 송신 대기 청크 (FIFO)
    tx_queue: Mutex<VecDeque<Bytes>>,

    /// 다음 페이로드 시퀀스 ID (순환)
    next_sequence: AtomicU8,

    /// 응답 대기 중인 시퀀스 ID
    inflight_sequence: AtomicU8,

    signal: AckSignal,
    events: mpsc::UnboundedSender<ConnectionEvent>,

    /// 터미널 도달 시 세션 ID를 알릴 채널. 알림은 정확히 한 번
    reaper: Mutex<Option<mpsc::UnboundedSender<u8>>>,
    quality: Mutex<Option<LinkQuality>>,
    stats: Mutex<SessionStats>,
}

impl Connection {
    /// 새 연결 생성 (초기 상태 NEW)
    ///
    /// ISS는 이후 `connect()`를, IRS는 첫 CONNECT 프레임 주입을 기다림
    pub fn new(
        config: Config,
        modem: Arc<dyn Modem>,
        session_id: u8,
        origin: String,
        destination: String,
    ) -> (Arc<Self>, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let conn = Arc::new_cyclic(|me| Self {
            config,
            modem,
            session_id,
            origin,
            destination,
            me: me.clone(),
            state: Mutex::new(State::New),
            is_initiator: AtomicBool::new(false),
            tx_queue: Mutex::new(VecDeque::new()),
            next_sequence: AtomicU8::new(rand::random()),
            inflight_sequence: AtomicU8::new(0),
            signal: AckSignal::new(),
            events: events_tx,
            reaper: Mutex::new(None),
            quality: Mutex::new(None),
            stats: Mutex::new(SessionStats::default()),
        });

        (conn, events_rx)
    }

    /// 세션 ID
    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    /// 현재 상태
    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// ISS(개시측) 여부
    pub fn is_initiator(&self) -> bool {
        self.is_initiator.load(Ordering::SeqCst)
    }

    /// 발신 호출부호
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// 상대 호출부호
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// 송신 큐 깊이
    pub fn queue_len(&self) -> usize {
        self.tx_queue.lock().len()
    }

    /// 전송 통계 스냅샷
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    /// 터미널 상태 도달 시 세션 ID를 한 번 송신할 채널 등록
    pub(crate) fn set_reaper(&self, tx: mpsc::UnboundedSender<u8>) {
        *self.reaper.lock() = Some(tx);
    }

    /// 링크 품질 추정치 갱신 (참고용)
    pub fn set_link_quality(&self, quality: LinkQuality) {
        *self.quality.lock() = Some(quality);
    }

    /// 마지막 링크 품질 추정치
    pub fn link_quality(&self) -> Option<LinkQuality> {
        *self.quality.lock()
    }

    /// 연결 시작 (NEW에서만 유효)
    ///
    /// CONNECTING으로 이행하고 ISS 역할로 CONNECT 프레임을
    /// 제한된 재시도와 함께 전송. 재시도 소진 시 FAILED
    pub fn connect(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != State::New {
                return Err(Error::InvalidState {
                    expected: State::New.name(),
                    got: state.name(),
                });
            }
        }

        self.set_state(State::Connecting);
        self.is_initiator.store(true, Ordering::SeqCst);

        let frame = Frame::connect(self.session_id, &self.origin, &self.destination)?;
        self.launch_twr(
            vec![frame.to_bytes()],
            TxMode::Signalling,
            self.config.connect_timeout,
            self.config.connect_retries,
        );
        Ok(())
    }

    /// 송신 큐에 페이로드 청크 추가
    ///
    /// 전송은 상태 머신이 주도하며 이 호출 자체는 송신하지 않음
    pub fn enqueue(&self, data: Bytes) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::ConnectionClosed);
        }
        if data.len() > self.config.max_payload_len {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: self.config.max_payload_len,
            });
        }

        let mut queue = self.tx_queue.lock();
        if self.config.max_queue_depth > 0 && queue.len() >= self.config.max_queue_depth {
            return Err(Error::QueueFull {
                max_depth: self.config.max_queue_depth,
            });
        }
        queue.push_back(data);
        Ok(())
    }

    /// 수신 프레임 주입 — 상태 머신의 유일한 외부 입력
    ///
    /// 호출 전에 프레임 코덱 검증(CRC)을 통과했어야 함.
    /// 진행 중인 재시도 대기에 수신 신호를 먼저 전달한 뒤 전이 테이블로 디스패치.
    /// 시퀀스가 맞지 않는 PAYLOAD_ACK는 신호를 울리기 전에 걸러냄 —
    /// 엉뚱한 ACK가 진행 중인 재전송 대기를 해제하면 안 됨
    pub fn on_frame_received(&self, frame: &Frame) {
        self.stats.lock().frames_received += 1;

        if frame.frame_type == FrameType::PayloadAck {
            let expected = self.inflight_sequence.load(Ordering::SeqCst);
            if frame.sequence_id != expected {
                self.stats.lock().ignored_frames += 1;
                warn!(
                    "[id={}] 시퀀스 불일치 ACK 무시: expected={}, got={}",
                    self.session_id, expected, frame.sequence_id
                );
                return;
            }
        }

        self.signal.notify();

        let state = self.state();
        debug!(
            "[id={}][state={}][ISS={}] 수신: {}",
            self.session_id,
            state,
            self.is_initiator(),
            frame.frame_type
        );

        match lookup(state, frame.frame_type) {
            Some(action) => self.dispatch(action, frame),
            None => {
                self.stats.lock().ignored_frames += 1;
                info!(
                    "[id={}] 알 수 없는 전이 무시: state={}, frame={}",
                    self.session_id, state, frame.frame_type
                );
            }
        }
    }

    /// 송신 큐 처리: 다음 청크 전송 또는 큐가 비면 종료 시작
    pub fn process_outbound_queue(&self) {
        self.advance_queue();
    }

    /// 연결 종료 시작 (DISCONNECTING → 제한된 재시도로 DISCONNECT 전송)
    pub fn disconnect(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::ConnectionClosed);
        }
        self.start_disconnect();
        Ok(())
    }

    /// 생존 확인 (CONNECTED에서만 유효)
    pub fn heartbeat(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != State::Connected {
                return Err(Error::InvalidState {
                    expected: State::Connected.name(),
                    got: state.name(),
                });
            }
        }

        self.set_state(State::HeartbeatSent);
        let frame = Frame::heartbeat(self.session_id);
        self.launch_twr(
            vec![frame.to_bytes()],
            TxMode::Signalling,
            self.config.data_timeout,
            self.config.data_retries,
        );
        Ok(())
    }

    // ── 전이 핸들러 ──────────────────────────────────────────────

    fn dispatch(&self, action: Action, frame: &Frame) {
        match action {
            Action::ConnectedIss => self.connected_iss(frame),
            Action::ConnectedIrs => self.connected_irs(frame),
            Action::ReceivedData => self.received_data(frame),
            Action::AdvanceQueue => self.advance_queue(),
            Action::ReceivedHeartbeat => self.received_heartbeat(frame),
            Action::ReceivedHeartbeatAck => self.received_heartbeat_ack(frame),
            Action::ReceivedDisconnect => self.received_disconnect(frame),
            Action::ReceivedDisconnectAck => self.received_disconnect_ack(frame),
        }
    }

    /// CONNECT_ACK 수신: ISS로 연결 확정, 큐 전송 시작
    fn connected_iss(&self, _frame: &Frame) {
        info!("[id={}] CONNECTED (ISS)", self.session_id);
        let changed = self.set_state(State::Connected);
        self.is_initiator.store(true, Ordering::SeqCst);
        if changed {
            self.emit(ConnectionEvent::Connected);
        }
        self.advance_queue();
    }

    /// CONNECT 수신: IRS로 연결 확정, CONNECT_ACK 응답
    ///
    /// CONNECTED에서 다시 받는 재전송 CONNECT에도 같은 ACK로 응답
    fn connected_irs(&self, _frame: &Frame) {
        info!("[id={}] CONNECTED (IRS)", self.session_id);
        let changed = self.set_state(State::Connected);
        self.is_initiator.store(false, Ordering::SeqCst);
        if changed {
            self.emit(ConnectionEvent::Connected);
        }

        // 호출부호 방향은 수신 프레임 기준 반전
        match Frame::connect_ack(self.session_id, &self.destination, &self.origin) {
            Ok(ack) => self.launch_hold(ack.to_bytes(), TxMode::Signalling),
            Err(e) => warn!("[id={}] CONNECT_ACK 생성 실패: {}", self.session_id, e),
        }
    }

    /// PAYLOAD 수신: 청크 전달 후 실제 시퀀스 ID로 PAYLOAD_ACK
    fn received_data(&self, frame: &Frame) {
        debug!(
            "[id={}] 페이로드 수신: seq={}, {} bytes",
            self.session_id,
            frame.sequence_id,
            frame.payload.len()
        );

        {
            let mut stats = self.stats.lock();
            stats.chunks_delivered += 1;
            stats.bytes_received += frame.payload.len() as u64;
        }
        self.emit(ConnectionEvent::DataReceived(frame.payload.clone()));

        let ack = Frame::payload_ack(self.session_id, frame.sequence_id);
        self.launch_hold(ack.to_bytes(), TxMode::Signalling);
    }

    /// PAYLOAD_ACK 수신 또는 큐 주도 진행: 다음 청크 전송, 큐가 비면 종료
    fn advance_queue(&self) {
        let next = self.tx_queue.lock().pop_front();
        match next {
            Some(data) => {
                self.set_state(State::PayloadSent);
                let sequence_id = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                self.inflight_sequence.store(sequence_id, Ordering::SeqCst);

                {
                    let mut stats = self.stats.lock();
                    stats.chunks_sent += 1;
                    stats.bytes_sent += data.len() as u64;
                }

                let mode = TxMode::for_payload(data.len());
                let frame = Frame::payload(self.session_id, sequence_id, data);
                self.launch_twr(
                    vec![frame.to_bytes()],
                    mode,
                    self.config.data_timeout,
                    self.config.data_retries,
                );
            }
            None => {
                info!("[id={}] 송신 큐 비움, 연결 종료 시작", self.session_id);
                self.start_disconnect();
            }
        }
    }

    /// HEARTBEAT 수신: HEARTBEAT_ACK 응답, CONNECTED 유지
    fn received_heartbeat(&self, _frame: &Frame) {
        let ack = Frame::heartbeat_ack(self.session_id);
        self.launch_hold(ack.to_bytes(), TxMode::Signalling);
    }

    /// HEARTBEAT_ACK 수신: CONNECTED 복귀
    fn received_heartbeat_ack(&self, _frame: &Frame) {
        self.set_state(State::Connected);
    }

    /// DISCONNECT 수신: DISCONNECT_ACK 응답 후 터미널
    fn received_disconnect(&self, _frame: &Frame) {
        info!("[id={}] DISCONNECTED (IRS)", self.session_id);
        let changed = self.set_state(State::Disconnected);
        self.is_initiator.store(false, Ordering::SeqCst);
        if changed {
            self.emit(ConnectionEvent::Disconnected);
        }

        // 이미 터미널이어도 재전송된 DISCONNECT에 멱등하게 재응답
        let ack = Frame::disconnect_ack(self.session_id);
        self.launch_hold(ack.to_bytes(), TxMode::Signalling);
    }

    /// DISCONNECT_ACK 수신: 터미널
    fn received_disconnect_ack(&self, _frame: &Frame) {
        info!("[id={}] DISCONNECTED", self.session_id);
        let changed = self.set_state(State::Disconnected);
        if changed {
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    // ── 내부 유틸 ────────────────────────────────────────────────

    fn start_disconnect(&self) {
        self.set_state(State::Disconnecting);
        let frame = Frame::disconnect(self.session_id);
        self.launch_twr(
            vec![frame.to_bytes()],
            TxMode::Signalling,
            self.config.connect_timeout,
            self.config.connect_retries,
        );
    }

    /// 능동 대기 재시도 태스크 기동 (ISS측)
    fn launch_twr(&self, burst: Vec<Bytes>, mode: TxMode, timeout: Duration, retries: u32) {
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let outcome =
                arq::send_with_retry(conn.modem.as_ref(), &conn.signal, &burst, mode, timeout, retries)
                    .await;

            let frames_per_cycle = burst.len() as u64;
            match outcome {
                ArqOutcome::Acked { attempts } => {
                    let mut stats = conn.stats.lock();
                    stats.frames_sent += attempts as u64 * frames_per_cycle;
                    stats.retransmits += (attempts as u64 - 1) * frames_per_cycle;
                }
                ArqOutcome::Exhausted => {
                    {
                        let mut stats = conn.stats.lock();
                        stats.frames_sent += retries as u64 * frames_per_cycle;
                        stats.retransmits += retries.saturating_sub(1) as u64 * frames_per_cycle;
                    }
                    conn.session_failed(FailReason::RetryExhausted);
                }
                ArqOutcome::Superseded => {}
            }
        });
    }

    /// 수동 대기 태스크 기동 (IRS측): 한 번 전송, 세션 상한까지 대기
    fn launch_hold(&self, frame: Bytes, mode: TxMode) {
        let Some(conn) = self.me.upgrade() else {
            return;
        };
        let hold = self.config.session_timeout;
        tokio::spawn(async move {
            // 전송은 send_and_hold 진입 즉시 일어나므로 대기 전에 집계
            conn.stats.lock().frames_sent += 1;
            let outcome =
                arq::send_and_hold(conn.modem.as_ref(), &conn.signal, frame, mode, hold).await;

            if outcome == ArqOutcome::Exhausted && !conn.state().is_terminal() {
                warn!("[id={}] 세션 상한 타임아웃", conn.session_id);
                conn.session_failed(FailReason::SessionTimeout);
            }
        });
    }

    /// 상태 변경. 실제로 바뀌었으면 true
    fn set_state(&self, next: State) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if *state == next {
                debug!("[id={}] 상태 유지: {}", self.session_id, next);
                false
            } else {
                info!(
                    "[id={}][ISS={}] 상태 전이: {} -> {}",
                    self.session_id,
                    self.is_initiator(),
                    *state,
                    next
                );
                *state = next;
                true
            }
        };

        if changed && next.is_terminal() {
            self.notify_terminal();
        }
        changed
    }

    /// 세션 실패 (터미널). 이미 터미널이면 no-op
    fn session_failed(&self, reason: FailReason) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            warn!(
                "[id={}] 세션 실패: {:?} ({} -> FAILED)",
                self.session_id, reason, *state
            );
            *state = State::Failed;
        }
        self.emit(ConnectionEvent::Failed(reason));
        self.notify_terminal();
    }

    fn notify_terminal(&self) {
        if let Some(tx) = self.reaper.lock().take() {
            let _ = tx.send(self.session_id);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!("[id={}] 이벤트 수신측 닫힘", self.session_id);
        }
    }
}
