//! 스테이션 엔드포인트 — 애플리케이션 표면과 수신 라우팅
//!
//! - `open`/`send`/`close`: 연결 핸들 기반 API
//! - `deliver`: 모뎀이 복조한 프레임의 단일 유입구.
//!   세션 ID로 기존 연결에 라우팅하고, 미지의 CONNECT면 IRS 연결을 생성함
//!
//! 무결성 검증 실패는 채널 특성상 예상되는 일이므로 조용히 폐기하고
//! 애플리케이션에는 에러로 노출하지 않음

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, EventReceiver};
use crate::frame::{Frame, FrameType};
use crate::modem::{LinkQuality, Modem};
use crate::session::SessionRegistry;
use crate::{Config, Error, Result};

/// 수신(IRS) 연결 스트림
pub type IncomingReceiver = mpsc::UnboundedReceiver<(Arc<Connection>, EventReceiver)>;

/// 스테이션 엔드포인트
///
/// 세션 ID 풀은 연결들이 공유하는 유일한 상태이며 레지스트리가 보호함
pub struct Endpoint {
    config: Config,
    callsign: String,
    modem: Arc<dyn Modem>,
    registry: Arc<SessionRegistry>,
    connections: Arc<DashMap<u8, Arc<Connection>>>,
    incoming: mpsc::UnboundedSender<(Arc<Connection>, EventReceiver)>,
    reaper: mpsc::UnboundedSender<u8>,
}

impl Endpoint {
    /// 새 엔드포인트 생성 (리퍼 태스크를 스폰하므로 tokio 런타임 안에서 호출)
    ///
    /// 반환되는 스트림으로 상대방이 개시한 연결이 전달됨
    pub fn new(
        config: Config,
        callsign: impl Into<String>,
        modem: Arc<dyn Modem>,
    ) -> (Self, IncomingReceiver) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (reaper_tx, mut reaper_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(SessionRegistry::new());
        let connections: Arc<DashMap<u8, Arc<Connection>>> = Arc::new(DashMap::new());

        // 리퍼 태스크: 터미널에 도달한 연결이 보낸 알림을 받아
        // 테이블에서 제거하고 세션 ID를 정확히 한 번 반환.
        // 수신 프레임 없이 터미널이 된 연결(무응답 채널의 재시도 소진)도 정리됨
        tokio::spawn({
            let registry = registry.clone();
            let connections = connections.clone();
            async move {
                while let Some(session_id) = reaper_rx.recv().await {
                    if let Some((_, conn)) = connections.remove(&session_id) {
                        info!("터미널 세션 정리: id={}, state={}", session_id, conn.state());
                        registry.release(session_id);
                    }
                }
            }
        });

        let endpoint = Self {
            config,
            callsign: callsign.into(),
            modem,
            registry,
            connections,
            incoming: incoming_tx,
            reaper: reaper_tx,
        };

        (endpoint, incoming_rx)
    }

    /// 로컬 호출부호
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// 활성 연결 수
    pub fn active_sessions(&self) -> usize {
        self.connections.len()
    }

    /// 세션 ID로 연결 핸들 조회
    pub fn connection(&self, session_id: u8) -> Option<Arc<Connection>> {
        self.connections.get(&session_id).map(|c| c.clone())
    }

    /// 상대 스테이션으로 연결 개시 (ISS)
    pub fn open(&self, destination: &str) -> Result<(Arc<Connection>, EventReceiver)> {
        let session_id = self.registry.allocate()?;

        let (conn, events) = Connection::new(
            self.config.clone(),
            self.modem.clone(),
            session_id,
            self.callsign.clone(),
            destination.to_string(),
        );

        if let Err(e) = conn.connect() {
            self.registry.release(session_id);
            return Err(e);
        }

        conn.set_reaper(self.reaper.clone());
        self.connections.insert(session_id, conn.clone());
        info!(
            "연결 개시: id={}, {} -> {}",
            session_id, self.callsign, destination
        );
        Ok((conn, events))
    }

    /// 연결의 송신 큐에 청크 추가
    pub fn send(&self, session_id: u8, data: Bytes) -> Result<()> {
        self.connection(session_id)
            .ok_or(Error::SessionNotFound { session_id })?
            .enqueue(data)
    }

    /// 연결 종료 요청
    pub fn close(&self, session_id: u8) -> Result<()> {
        self.connection(session_id)
            .ok_or(Error::SessionNotFound { session_id })?
            .disconnect()
    }

    /// 모뎀이 복조한 프레임 주입
    pub fn deliver(&self, data: &[u8]) {
        self.deliver_inner(data, None);
    }

    /// 링크 품질 추정치와 함께 프레임 주입
    pub fn deliver_with_quality(&self, data: &[u8], quality: LinkQuality) {
        self.deliver_inner(data, Some(quality));
    }

    fn deliver_inner(&self, data: &[u8], quality: Option<LinkQuality>) {
        let frame = match Frame::from_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                // 채널 손상은 미수신과 동일: 조용히 폐기
                debug!("프레임 검증 실패, 폐기: {}", e);
                return;
            }
        };

        if let Some(conn) = self.connection(frame.session_id) {
            if let Some(quality) = quality {
                conn.set_link_quality(quality);
            }
            conn.on_frame_received(&frame);
        } else if frame.frame_type == FrameType::Connect {
            self.accept(frame, quality);
        } else {
            debug!(
                "미지 세션 프레임 폐기: session_id={}, frame={}",
                frame.session_id, frame.frame_type
            );
        }
    }

    /// 미지의 CONNECT 프레임으로 IRS 연결 생성
    fn accept(&self, frame: Frame, quality: Option<LinkQuality>) {
        let (origin, destination) = match frame.callsigns() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("CONNECT 호출부호 파싱 실패, 폐기: {}", e);
                return;
            }
        };

        if destination != self.callsign {
            // 방송 매체 특성상 남의 CONNECT도 들림
            debug!(
                "다른 스테이션 대상 CONNECT 무시: destination={}",
                destination
            );
            return;
        }

        if let Err(e) = self.registry.adopt(frame.session_id) {
            warn!("CONNECT 세션 ID 등록 실패: {}", e);
            return;
        }

        let (conn, events) = Connection::new(
            self.config.clone(),
            self.modem.clone(),
            frame.session_id,
            origin.clone(),
            destination,
        );
        conn.set_reaper(self.reaper.clone());
        if let Some(quality) = quality {
            conn.set_link_quality(quality);
        }
        self.connections.insert(frame.session_id, conn.clone());

        // NEW + CONNECT -> IRS로 연결 확정, CONNECT_ACK 응답
        conn.on_frame_received(&frame);

        info!("수신 연결 수락: id={}, origin={}", frame.session_id, origin);
        if self.incoming.send((conn, events)).is_err() {
            debug!("수신 연결 스트림 닫힘");
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionEvent, FailReason, State};
    use crate::modem::testing::RecordingModem;
    use crate::modem::TxMode;
    use std::time::Duration;

    fn make_endpoint(callsign: &str) -> (Endpoint, IncomingReceiver, Arc<RecordingModem>) {
        let modem = Arc::new(RecordingModem::default());
        let (endpoint, incoming) = Endpoint::new(Config::local_loop(), callsign, modem.clone());
        (endpoint, incoming, modem)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_allocates_and_transmits_connect() {
        let (endpoint, _incoming, modem) = make_endpoint("DN1AAA-1");

        let (conn, _events) = endpoint.open("DN2BBB-3").unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(conn.state(), State::Connecting);
        assert!(conn.is_initiator());
        assert_eq!(endpoint.active_sessions(), 1);

        let (mode, bytes) = modem.last().unwrap();
        assert_eq!(mode, TxMode::Signalling);
        let frame = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(frame.frame_type, FrameType::Connect);
        assert_eq!(frame.session_id, conn.session_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_connect_accepts_responder() {
        let (endpoint, mut incoming, modem) = make_endpoint("DN2BBB-3");

        let connect = Frame::connect(99, "DN1AAA-1", "DN2BBB-3").unwrap();
        endpoint.deliver(&connect.to_bytes());
        tokio::time::sleep(Duration::from_millis(1)).await;

        let (conn, mut events) = incoming.try_recv().unwrap();
        assert_eq!(conn.session_id(), 99);
        assert_eq!(conn.state(), State::Connected);
        assert!(!conn.is_initiator());
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(endpoint.active_sessions(), 1);

        let frame = Frame::from_bytes(&modem.last().unwrap().1).unwrap();
        assert_eq!(frame.frame_type, FrameType::ConnectAck);
        assert_eq!(frame.session_id, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_frame_silently_dropped() {
        let (endpoint, mut incoming, modem) = make_endpoint("DN2BBB-3");

        let mut bytes = Frame::connect(99, "DN1AAA-1", "DN2BBB-3")
            .unwrap()
            .to_bytes()
            .to_vec();
        let len = bytes.len();
        bytes[len - 1] ^= 0xFF;

        endpoint.deliver(&bytes);

        assert_eq!(endpoint.active_sessions(), 0);
        assert!(incoming.try_recv().is_err());
        assert_eq!(modem.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_non_connect_dropped() {
        let (endpoint, mut incoming, _modem) = make_endpoint("DN2BBB-3");

        let stray = Frame::payload(123, 0, Bytes::from_static(b"stray"));
        endpoint.deliver(&stray.to_bytes());

        assert_eq!(endpoint.active_sessions(), 0);
        assert!(incoming.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_session_reaped_and_id_reusable() {
        let (endpoint, _incoming, _modem) = make_endpoint("DN2BBB-3");

        let connect = Frame::connect(42, "DN1AAA-1", "DN2BBB-3").unwrap();
        endpoint.deliver(&connect.to_bytes());
        assert_eq!(endpoint.active_sessions(), 1);

        endpoint.deliver(&Frame::disconnect(42).to_bytes());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(endpoint.active_sessions(), 0);

        // ID가 풀로 돌아갔으므로 같은 ID의 새 CONNECT 수락 가능
        endpoint.deliver(&connect.to_bytes());
        assert_eq!(endpoint.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reaped_without_inbound_traffic() {
        let (endpoint, _incoming, _modem) = make_endpoint("DN1AAA-1");

        let (conn, mut events) = endpoint.open("DN2BBB-3").unwrap();
        assert_eq!(endpoint.active_sessions(), 1);

        // 무응답 채널: 연결 재시도 소진 후, 수신 프레임 없이도 정리되어야 함
        let event = events.recv().await.unwrap();
        assert_eq!(event, ConnectionEvent::Failed(FailReason::RetryExhausted));
        assert_eq!(conn.state(), State::Failed);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(endpoint.active_sessions(), 0);

        // 반환된 ID 포함 전체 풀이 다시 쓸 수 있는 상태
        assert!(endpoint.open("DN2BBB-3").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_close_require_known_session() {
        let (endpoint, _incoming, _modem) = make_endpoint("DN1AAA-1");

        assert!(matches!(
            endpoint.send(200, Bytes::from_static(b"x")),
            Err(Error::SessionNotFound { session_id: 200 })
        ));
        assert!(matches!(
            endpoint.close(200),
            Err(Error::SessionNotFound { session_id: 200 })
        ));
    }

    /// 인프로세스 채널 모뎀: 전송 프레임을 상대 엔드포인트로 넘김
    struct ChannelModem {
        tx: mpsc::UnboundedSender<Bytes>,
    }

    impl Modem for ChannelModem {
        fn transmit(&self, _mode: TxMode, frame: Bytes) {
            let _ = self.tx.send(frame);
        }
    }

    #[tokio::test]
    async fn test_loopback_two_chunk_transfer() {
        let (a_tx, mut a_out) = mpsc::unbounded_channel();
        let (b_tx, mut b_out) = mpsc::unbounded_channel();

        let (endpoint_a, _incoming_a) = Endpoint::new(
            Config::local_loop(),
            "DN1AAA-1",
            Arc::new(ChannelModem { tx: a_tx }),
        );
        let (endpoint_b, mut incoming_b) = Endpoint::new(
            Config::local_loop(),
            "DN2BBB-3",
            Arc::new(ChannelModem { tx: b_tx }),
        );
        let endpoint_a = Arc::new(endpoint_a);
        let endpoint_b = Arc::new(endpoint_b);

        // 양방향 펌프: A가 송신한 프레임은 B가 수신, 반대도 동일
        tokio::spawn({
            let endpoint_b = endpoint_b.clone();
            async move {
                while let Some(frame) = a_out.recv().await {
                    endpoint_b.deliver(&frame);
                }
            }
        });
        tokio::spawn({
            let endpoint_a = endpoint_a.clone();
            async move {
                while let Some(frame) = b_out.recv().await {
                    endpoint_a.deliver(&frame);
                }
            }
        });

        let (conn_a, mut events_a) = endpoint_a.open("DN2BBB-3").unwrap();
        conn_a.enqueue(Bytes::from_static(b"hello")).unwrap();
        conn_a.enqueue(Bytes::from_static(b"world")).unwrap();

        // B측: 수신 연결과 두 청크, 정상 종료
        let (conn_b, mut events_b) = incoming_b.recv().await.unwrap();
        assert_eq!(events_b.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            events_b.recv().await.unwrap(),
            ConnectionEvent::DataReceived(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            events_b.recv().await.unwrap(),
            ConnectionEvent::DataReceived(Bytes::from_static(b"world"))
        );
        assert_eq!(events_b.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(conn_b.state(), State::Disconnected);

        // A측: 연결 후 정상 종료
        assert_eq!(events_a.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(events_a.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(conn_a.state(), State::Disconnected);
        assert_eq!(conn_a.stats().chunks_sent, 2);
    }
}
