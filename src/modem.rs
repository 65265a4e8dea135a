//! 모뎀 게이트웨이 인터페이스
//!
//! 오디오 캡처/재생과 변복조는 외부 모뎀의 책임이며,
//! 코어는 `transmit(mode, frame)` 호출과 프레임 수신 콜백으로만 연결됨

use bytes::Bytes;

/// 전송 모드 (처리율 ↔ 견고성 트레이드오프)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// 저속/고견고성 시그널링 모드. 모든 제어 프레임과 짧은 페이로드에 사용
    Signalling,

    /// 대용량 페이로드용 데이터 모드
    Data,
}

impl TxMode {
    /// 해당 모드가 실어 나를 수 있는 페이로드 청크 최대 크기 (바이트)
    pub fn capacity(&self) -> usize {
        match self {
            TxMode::Signalling => 11,
            TxMode::Data => 510,
        }
    }

    /// 페이로드 크기에 맞는 모드 선택
    pub fn for_payload(len: usize) -> TxMode {
        if len <= TxMode::Signalling.capacity() {
            TxMode::Signalling
        } else {
            TxMode::Data
        }
    }
}

/// 모뎀 게이트웨이
///
/// `transmit`은 동기 fire-and-forget: 전송 완료 신호는 없고,
/// 완료 여부는 응답 프레임 수신 또는 타임아웃으로만 추정함
pub trait Modem: Send + Sync {
    fn transmit(&self, mode: TxMode, frame: Bytes);
}

/// 수신 프레임에 딸려오는 링크 품질 추정치 (참고용, 정확성에 영향 없음)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkQuality {
    /// 신호 대 잡음비 (dB)
    pub snr: f32,

    /// 주파수 오프셋 추정 (Hz)
    pub frequency_offset: f32,
}

/// 테스트용 전송 기록 모뎀 (여러 모듈의 테스트에서 공용)
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingModem {
        pub(crate) transmitted: Mutex<Vec<(TxMode, Bytes)>>,
    }

    impl RecordingModem {
        pub(crate) fn count(&self) -> usize {
            self.transmitted.lock().len()
        }

        pub(crate) fn last(&self) -> Option<(TxMode, Bytes)> {
            self.transmitted.lock().last().cloned()
        }
    }

    impl Modem for RecordingModem {
        fn transmit(&self, mode: TxMode, frame: Bytes) {
            self.transmitted.lock().push((mode, frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection_by_payload_len() {
        assert_eq!(TxMode::for_payload(0), TxMode::Signalling);
        assert_eq!(TxMode::for_payload(11), TxMode::Signalling);
        assert_eq!(TxMode::for_payload(12), TxMode::Data);
        assert_eq!(TxMode::for_payload(510), TxMode::Data);
    }
}
