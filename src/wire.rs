//! Byte framing of the session read/write surface.
//!
//! Write: `[kind:4][id:4][payload]`. Read: `[status:4][id:4][payload]`.
//! All integers are little-endian.

use crate::error::{Result, SchedError};
use crate::scheduler::{CompletedJob, JobKind, JobStatus};

pub const HEADER_LEN: usize = 8;

/// A decoded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFrame {
    pub kind: JobKind,
    pub id: u32,
    pub payload: Vec<u8>,
}

impl WriteFrame {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(SchedError::ShortWrite(buf.len()));
        }
        let kind = read_u32(&buf[0..4]);
        let id = read_u32(&buf[4..8]);
        Ok(Self {
            kind: JobKind(kind),
            id,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.kind.0.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A decoded read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFrame {
    pub status: JobStatus,
    pub id: u32,
    pub payload: Vec<u8>,
}

impl ReadFrame {
    /// Encode a finished job. Fire-and-forget jobs (`id == 0`) produce no
    /// bytes.
    pub fn encode(job: &CompletedJob) -> Vec<u8> {
        if job.id == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(HEADER_LEN + job.payload.len());
        out.extend_from_slice(&job.status.code().to_le_bytes());
        out.extend_from_slice(&job.id.to_le_bytes());
        out.extend_from_slice(&job.payload);
        out
    }

    /// `None` for an empty read.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            status: JobStatus::from_code(read_u32(&buf[0..4])),
            id: read_u32(&buf[4..8]),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobRef;

    #[test]
    fn test_decode_write_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0002_0000u32.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(b"abcd");

        let frame = WriteFrame::decode(&buf).unwrap();
        assert_eq!(frame.kind, JobKind(0x0002_0000));
        assert_eq!(frame.id, 7);
        assert_eq!(frame.payload, b"abcd");
        assert_eq!(frame.encode(), buf);
    }

    #[test]
    fn test_short_write_is_rejected() {
        assert_eq!(
            WriteFrame::decode(&[1, 2, 3, 4, 5]),
            Err(SchedError::ShortWrite(5))
        );
        assert_eq!(WriteFrame::decode(&[]), Err(SchedError::ShortWrite(0)));
    }

    #[test]
    fn test_header_only_write_has_empty_payload() {
        let frame = WriteFrame::decode(&[0; 8]).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_encode_read_frame() {
        let job = CompletedJob {
            job_ref: JobRef(1),
            kind: JobKind(0x0002_0000),
            id: 7,
            status: JobStatus::Complete,
            payload: b"abcd".to_vec(),
        };
        let bytes = ReadFrame::encode(&job);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..], b"abcd");

        let frame = ReadFrame::decode(&bytes).unwrap();
        assert_eq!(frame.status, JobStatus::Complete);
        assert_eq!(frame.id, 7);
    }

    #[test]
    fn test_fire_and_forget_reads_empty() {
        let job = CompletedJob {
            job_ref: JobRef(1),
            kind: JobKind(0x0001_0000),
            id: 0,
            status: JobStatus::Complete,
            payload: b"data".to_vec(),
        };
        assert!(ReadFrame::encode(&job).is_empty());
        assert!(ReadFrame::decode(&[]).is_none());
    }
}
