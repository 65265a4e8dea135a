//! 에러 타입 정의

use thiserror::Error;

/// RSL 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("CRC 불일치: expected {expected:04X}, got {got:04X}")]
    CrcMismatch { expected: u16, got: u16 },

    #[error("프레임 길이 부족: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("알 수 없는 프레임 타입: {tag}")]
    UnknownFrameType { tag: u8 },

    #[error("잘못된 프레임 형식: {reason}")]
    MalformedFrame { reason: &'static str },

    #[error("호출부호가 유효하지 않음: {callsign}")]
    InvalidCallsign { callsign: String },

    #[error("사용 가능한 세션 ID 없음")]
    SessionIdExhausted,

    #[error("세션 없음: session_id={session_id}")]
    SessionNotFound { session_id: u8 },

    #[error("세션 ID 이미 사용 중: session_id={session_id}")]
    SessionAlreadyActive { session_id: u8 },

    #[error("유효하지 않은 상태: expected {expected}, got {got}")]
    InvalidState {
        expected: &'static str,
        got: &'static str,
    },

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("송신 큐 가득 참: 최대 깊이 {max_depth} 초과")]
    QueueFull { max_depth: usize },

    #[error("페이로드 크기 초과: {len} bytes, 최대 {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
