//! # RSL (Radio Session Layer)
//!
//! 반이중 무선 링크용 ARQ 기반 P2P 세션 프로토콜
//!
//! ## 핵심 특징
//! - **ARQ**: 타임아웃 기반 재전송, 제한된 재시도 횟수
//! - **반이중**: 한 번에 한 쪽만 송신, 역할(ISS/IRS) 기반 교대
//! - **상태 머신**: (상태, 프레임 타입) 정적 전이 테이블로 구동
//! - **세션 레지스트리**: 동시 연결 간 세션 ID 충돌 방지
//! - **CRC 무결성**: 제어 프레임 CRC-8, 페이로드 프레임 CRC-16
//! - **모뎀 추상화**: 오디오 DSP/변조는 외부 모뎀 게이트웨이에 위임

pub mod arq;
pub mod config;
pub mod connection;
pub mod crc;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod modem;
pub mod session;
pub mod stats;

pub use arq::{AckSignal, ArqOutcome};
pub use config::Config;
pub use connection::{Connection, ConnectionEvent, EventReceiver, FailReason, State};
pub use endpoint::{Endpoint, IncomingReceiver};
pub use error::{Error, Result};
pub use frame::{Frame, FrameType};
pub use modem::{LinkQuality, Modem, TxMode};
pub use session::SessionRegistry;
pub use stats::SessionStats;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 동시 활성 세션 최대 수 (세션 ID는 1~255)
pub const MAX_SESSIONS: usize = 255;

/// 호출부호 최대 길이 (SSID 포함)
pub const MAX_CALLSIGN_LEN: usize = 11;
