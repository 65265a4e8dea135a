//! 세션 프레임 정의와 직렬화
//!
//! 와이어 형식 (고정, build/parse 대칭):
//! - 공통: `[frame_type u8][session_id u8] ... [체크섬]`
//! - PAYLOAD: `[type][session][sequence u8][payload][crc16 BE]`
//! - PAYLOAD_ACK: `[type][session][sequence u8][crc8]`
//! - CONNECT/CONNECT_ACK: `[type][session][origin_len][origin][dest_len][dest][crc8]`
//! - 그 외 제어 프레임: `[type][session][crc8]`
//!
//! 체크섬은 항상 앞선 전체 바이트에 대해 계산됨

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{crc16, crc8};
use crate::{Error, Result, MAX_CALLSIGN_LEN};

/// 프레임 타입 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// 연결 요청 (호출부호 포함)
    Connect = 1,

    /// 연결 승인
    ConnectAck = 2,

    /// 페이로드 청크
    Payload = 3,

    /// 페이로드 승인
    PayloadAck = 4,

    /// 연결 종료 요청
    Disconnect = 5,

    /// 연결 종료 승인
    DisconnectAck = 6,

    /// 생존 확인
    Heartbeat = 7,

    /// 생존 확인 응답
    HeartbeatAck = 8,
}

impl FrameType {
    /// sequence_id 필드를 가지는 타입인지
    fn carries_sequence(&self) -> bool {
        matches!(self, FrameType::Payload | FrameType::PayloadAck)
    }

    /// CRC-16을 쓰는 타입인지 (페이로드 프레임은 손상 표면이 커서 16비트)
    fn wide_integrity(&self) -> bool {
        matches!(self, FrameType::Payload)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(FrameType::Connect),
            2 => Ok(FrameType::ConnectAck),
            3 => Ok(FrameType::Payload),
            4 => Ok(FrameType::PayloadAck),
            5 => Ok(FrameType::Disconnect),
            6 => Ok(FrameType::DisconnectAck),
            7 => Ok(FrameType::Heartbeat),
            8 => Ok(FrameType::HeartbeatAck),
            tag => Err(Error::UnknownFrameType { tag }),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameType::Connect => "CONNECT",
            FrameType::ConnectAck => "CONNECT_ACK",
            FrameType::Payload => "PAYLOAD",
            FrameType::PayloadAck => "PAYLOAD_ACK",
            FrameType::Disconnect => "DISCONNECT",
            FrameType::DisconnectAck => "DISCONNECT_ACK",
            FrameType::Heartbeat => "HEARTBEAT",
            FrameType::HeartbeatAck => "HEARTBEAT_ACK",
        };
        write!(f, "{}", name)
    }
}

/// 세션 프레임
#[derive(Debug, Clone)]
pub struct Frame {
    /// 프레임 타입
    pub frame_type: FrameType,

    /// 세션 ID (1~255)
    pub session_id: u8,

    /// 시퀀스 ID (PAYLOAD/PAYLOAD_ACK만 의미 있음, 0~255 순환)
    pub sequence_id: u8,

    /// 페이로드 (제어 프레임은 비어 있거나 호출부호)
    pub payload: Bytes,
}

impl Frame {
    /// CONNECT 프레임 생성
    pub fn connect(session_id: u8, origin: &str, destination: &str) -> Result<Frame> {
        Ok(Frame {
            frame_type: FrameType::Connect,
            session_id,
            sequence_id: 0,
            payload: encode_callsigns(origin, destination)?,
        })
    }

    /// CONNECT_ACK 프레임 생성
    pub fn connect_ack(session_id: u8, origin: &str, destination: &str) -> Result<Frame> {
        Ok(Frame {
            frame_type: FrameType::ConnectAck,
            session_id,
            sequence_id: 0,
            payload: encode_callsigns(origin, destination)?,
        })
    }

    /// PAYLOAD 프레임 생성
    pub fn payload(session_id: u8, sequence_id: u8, data: Bytes) -> Frame {
        Frame {
            frame_type: FrameType::Payload,
            session_id,
            sequence_id,
            payload: data,
        }
    }

    /// PAYLOAD_ACK 프레임 생성 (수신 청크의 실제 시퀀스 ID를 에코)
    pub fn payload_ack(session_id: u8, sequence_id: u8) -> Frame {
        Frame {
            frame_type: FrameType::PayloadAck,
            session_id,
            sequence_id,
            payload: Bytes::new(),
        }
    }

    /// DISCONNECT 프레임 생성
    pub fn disconnect(session_id: u8) -> Frame {
        Frame::control(FrameType::Disconnect, session_id)
    }

    /// DISCONNECT_ACK 프레임 생성
    pub fn disconnect_ack(session_id: u8) -> Frame {
        Frame::control(FrameType::DisconnectAck, session_id)
    }

    /// HEARTBEAT 프레임 생성
    pub fn heartbeat(session_id: u8) -> Frame {
        Frame::control(FrameType::Heartbeat, session_id)
    }

    /// HEARTBEAT_ACK 프레임 생성
    pub fn heartbeat_ack(session_id: u8) -> Frame {
        Frame::control(FrameType::HeartbeatAck, session_id)
    }

    fn control(frame_type: FrameType, session_id: u8) -> Frame {
        Frame {
            frame_type,
            session_id,
            sequence_id: 0,
            payload: Bytes::new(),
        }
    }

    /// 프레임을 바이트로 직렬화 (체크섬 포함)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.payload.len() + 2);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.session_id);
        if self.frame_type.carries_sequence() {
            buf.put_u8(self.sequence_id);
        }
        buf.extend_from_slice(&self.payload);

        if self.frame_type.wide_integrity() {
            let sum = crc16(&buf);
            buf.put_u16(sum);
        } else {
            let sum = crc8(&buf);
            buf.put_u8(sum);
        }

        buf.freeze()
    }

    /// 바이트에서 프레임 역직렬화
    ///
    /// 체크섬이 맞지 않으면 `CrcMismatch` — 수신 경로에서는
    /// 미수신과 동일하게 취급해 조용히 폐기해야 함
    pub fn from_bytes(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < 3 {
            return Err(Error::FrameTooShort { len: bytes.len() });
        }

        let frame_type = FrameType::try_from(bytes[0])?;

        let crc_len = if frame_type.wide_integrity() { 2 } else { 1 };
        let header_len = if frame_type.carries_sequence() { 3 } else { 2 };
        if bytes.len() < header_len + crc_len {
            return Err(Error::FrameTooShort { len: bytes.len() });
        }

        let (body, trailer) = bytes.split_at(bytes.len() - crc_len);

        if frame_type.wide_integrity() {
            let expected = crc16(body);
            let got = u16::from_be_bytes([trailer[0], trailer[1]]);
            if expected != got {
                return Err(Error::CrcMismatch { expected, got });
            }
        } else {
            let expected = crc8(body);
            let got = trailer[0];
            if expected != got {
                return Err(Error::CrcMismatch {
                    expected: expected as u16,
                    got: got as u16,
                });
            }
        }

        let session_id = body[1];
        let sequence_id = if frame_type.carries_sequence() {
            body[2]
        } else {
            0
        };
        let payload = Bytes::copy_from_slice(&body[header_len..]);

        Ok(Frame {
            frame_type,
            session_id,
            sequence_id,
            payload,
        })
    }

    /// CONNECT/CONNECT_ACK 페이로드에서 (origin, destination) 호출부호 추출
    pub fn callsigns(&self) -> Result<(String, String)> {
        let data = &self.payload;
        if data.is_empty() {
            return Err(Error::MalformedFrame {
                reason: "호출부호 페이로드 없음",
            });
        }

        let origin_len = data[0] as usize;
        if data.len() < 1 + origin_len + 1 {
            return Err(Error::MalformedFrame {
                reason: "origin 호출부호 잘림",
            });
        }
        let origin = std::str::from_utf8(&data[1..1 + origin_len]).map_err(|_| {
            Error::MalformedFrame {
                reason: "origin 호출부호 UTF-8 아님",
            }
        })?;

        let dest_start = 1 + origin_len;
        let dest_len = data[dest_start] as usize;
        if data.len() < dest_start + 1 + dest_len {
            return Err(Error::MalformedFrame {
                reason: "destination 호출부호 잘림",
            });
        }
        let destination = std::str::from_utf8(&data[dest_start + 1..dest_start + 1 + dest_len])
            .map_err(|_| Error::MalformedFrame {
                reason: "destination 호출부호 UTF-8 아님",
            })?;

        Ok((origin.to_string(), destination.to_string()))
    }
}

/// 호출부호 쌍을 `[len][bytes][len][bytes]`로 인코딩
fn encode_callsigns(origin: &str, destination: &str) -> Result<Bytes> {
    for callsign in [origin, destination] {
        if callsign.is_empty() || callsign.len() > MAX_CALLSIGN_LEN {
            return Err(Error::InvalidCallsign {
                callsign: callsign.to_string(),
            });
        }
    }

    let mut buf = BytesMut::with_capacity(2 + origin.len() + destination.len());
    buf.put_u8(origin.len() as u8);
    buf.extend_from_slice(origin.as_bytes());
    buf.put_u8(destination.len() as u8);
    buf.extend_from_slice(destination.as_bytes());
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::TxMode;

    #[test]
    fn test_connect_roundtrip() {
        let frame = Frame::connect(42, "DN1AAA-1", "DN2BBB-3").unwrap();
        let bytes = frame.to_bytes();
        let restored = Frame::from_bytes(&bytes).unwrap();

        assert_eq!(restored.frame_type, FrameType::Connect);
        assert_eq!(restored.session_id, 42);
        let (origin, destination) = restored.callsigns().unwrap();
        assert_eq!(origin, "DN1AAA-1");
        assert_eq!(destination, "DN2BBB-3");
    }

    #[test]
    fn test_payload_roundtrip() {
        let data = Bytes::from(vec![0xAB; 100]);
        let frame = Frame::payload(7, 200, data.clone());
        let restored = Frame::from_bytes(&frame.to_bytes()).unwrap();

        assert_eq!(restored.frame_type, FrameType::Payload);
        assert_eq!(restored.session_id, 7);
        assert_eq!(restored.sequence_id, 200);
        assert_eq!(restored.payload, data);
    }

    #[test]
    fn test_payload_roundtrip_empty_and_max() {
        for len in [0usize, TxMode::Data.capacity()] {
            let data = Bytes::from(vec![0x5A; len]);
            let restored = Frame::from_bytes(&Frame::payload(1, 0, data.clone()).to_bytes()).unwrap();
            assert_eq!(restored.payload.len(), len);
            assert_eq!(restored.payload, data);
        }
    }

    #[test]
    fn test_control_roundtrip_all_types() {
        for (frame, frame_type) in [
            (Frame::payload_ack(9, 77), FrameType::PayloadAck),
            (Frame::disconnect(9), FrameType::Disconnect),
            (Frame::disconnect_ack(9), FrameType::DisconnectAck),
            (Frame::heartbeat(9), FrameType::Heartbeat),
            (Frame::heartbeat_ack(9), FrameType::HeartbeatAck),
        ] {
            let restored = Frame::from_bytes(&frame.to_bytes()).unwrap();
            assert_eq!(restored.frame_type, frame_type);
            assert_eq!(restored.session_id, 9);
        }
    }

    #[test]
    fn test_payload_ack_echoes_sequence() {
        let restored = Frame::from_bytes(&Frame::payload_ack(3, 142).to_bytes()).unwrap();
        assert_eq!(restored.sequence_id, 142);
    }

    #[test]
    fn test_corrupted_frame_rejected() {
        let mut bytes = Frame::payload(1, 5, Bytes::from_static(b"hello")).to_bytes().to_vec();
        bytes[4] ^= 0xFF;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(Error::CrcMismatch { .. })
        ));

        let mut control = Frame::disconnect(1).to_bytes().to_vec();
        control[1] ^= 0x01;
        assert!(matches!(
            Frame::from_bytes(&control),
            Err(Error::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(
            Frame::from_bytes(&[1, 2]),
            Err(Error::FrameTooShort { .. })
        ));
        assert!(matches!(
            Frame::from_bytes(&[]),
            Err(Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        assert!(matches!(
            Frame::from_bytes(&[0xEE, 1, 0]),
            Err(Error::UnknownFrameType { tag: 0xEE })
        ));
    }

    #[test]
    fn test_callsign_too_long_rejected() {
        assert!(matches!(
            Frame::connect(1, "TOOLONGCALLSIGN-15", "DN2BBB"),
            Err(Error::InvalidCallsign { .. })
        ));
    }
}
