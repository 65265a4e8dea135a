//! 프로토콜 설정

use std::time::Duration;

use crate::modem::TxMode;

/// RSL 프로토콜 설정
///
/// 타이밍 기본값은 HF 링크 기준 (연결 10초/1회, 데이터 5초/5회, 세션 100초)
#[derive(Debug, Clone)]
pub struct Config {
    /// CONNECT 응답 대기 타임아웃
    pub connect_timeout: Duration,

    /// CONNECT 전송 횟수 (첫 전송 포함)
    pub connect_retries: u32,

    /// PAYLOAD 응답 대기 타임아웃
    pub data_timeout: Duration,

    /// PAYLOAD 전송 횟수 (첫 전송 포함)
    pub data_retries: u32,

    /// 세션 전체 상한 타임아웃
    ///
    /// IRS가 상대방 소실 시 무한 대기하지 않기 위한 백스톱
    pub session_timeout: Duration,

    /// 송신 큐 최대 깊이 (0이면 무제한)
    pub max_queue_depth: usize,

    /// 페이로드 청크 최대 크기 (바이트)
    pub max_payload_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            connect_retries: 1,
            data_timeout: Duration::from_secs(5),
            data_retries: 5,
            session_timeout: Duration::from_secs(100),
            max_queue_depth: 0,
            max_payload_len: TxMode::Data.capacity(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 약신호 HF 링크용 설정
    ///
    /// 타임아웃을 늘리고 재시도를 아끼지 않음
    pub fn weak_signal() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            connect_retries: 3,
            data_timeout: Duration::from_secs(10),
            data_retries: 10,
            session_timeout: Duration::from_secs(300),
            max_queue_depth: 32,
            max_payload_len: TxMode::Signalling.capacity(),
        }
    }

    /// 인프로세스 루프백/테스트용 설정 (짧은 타이밍)
    pub fn local_loop() -> Self {
        Self {
            connect_timeout: Duration::from_millis(200),
            connect_retries: 2,
            data_timeout: Duration::from_millis(200),
            data_retries: 5,
            session_timeout: Duration::from_secs(5),
            max_queue_depth: 64,
            max_payload_len: TxMode::Data.capacity(),
        }
    }
}
