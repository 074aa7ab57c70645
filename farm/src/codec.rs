//! The binary pack/unpack codec.
//!
//! Every message is one contiguous frame: a fixed header of little-endian
//! i32s followed, for data-bearing tags, by the raw bytes of each sync
//! task bank in declared bank order. The same bank order and sync filter
//! are used by the checkpoint engine when it slices staged records; the
//! two must never diverge or offsets corrupt silently.


use crate::{
    comm::CommError,
    layout::Schema,
    pool::{Task, TaskStatus},
    FarmError, MAX_RANK,
};
use byteorder::{ByteOrder, LittleEndian};

/// header: tag, tid, status, location
pub const HEADER_INTS: usize = 3 + MAX_RANK;
pub const HEADER_BYTES: usize = HEADER_INTS * 4;

/// sentinel tid for empty slots and control messages
pub const EMPTY_TID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Tag {
    Data = 1,
    Result = 2,
    CheckpointEcho = 3,
    Terminate = 4,
}

impl Tag {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Tag::Data),
            2 => Some(Tag::Result),
            3 => Some(Tag::CheckpointEcho),
            4 => Some(Tag::Terminate),
            _ => None,
        }
    }
}

/// Header plus payload of one task-bearing message.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFrame {
    pub tid: i32,
    pub status: TaskStatus,
    pub location: [usize; MAX_RANK],
    pub payload: Vec<u8>,
}

/// A decoded protocol message. Exactly one encode/decode pair per
/// variant; no header field means anything it does not say.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Terminate,
    Data(TaskFrame),
    Result(TaskFrame),
    CheckpointEcho(TaskFrame),
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::Terminate => Tag::Terminate,
            Message::Data(_) => Tag::Data,
            Message::Result(_) => Tag::Result,
            Message::CheckpointEcho(_) => Tag::CheckpointEcho,
        }
    }

    pub fn frame(&self) -> Option<&TaskFrame> {
        match self {
            Message::Terminate => None,
            Message::Data(frame) | Message::Result(frame) | Message::CheckpointEcho(frame) => {
                Some(frame)
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.frame().map(|frame| frame.payload.len()).unwrap_or(0);
        let mut buf = vec![0u8; HEADER_BYTES + payload_len];

        LittleEndian::write_i32(&mut buf[0..], self.tag() as i32);

        match self.frame() {
            None => {
                LittleEndian::write_i32(&mut buf[4..], EMPTY_TID);
            }
            Some(frame) => {
                LittleEndian::write_i32(&mut buf[4..], frame.tid);
                LittleEndian::write_i32(&mut buf[8..], frame.status as i32);
                LittleEndian::write_i32(&mut buf[12..], frame.location[0] as i32);
                LittleEndian::write_i32(&mut buf[16..], frame.location[1] as i32);
                buf[HEADER_BYTES..].copy_from_slice(&frame.payload);
            }
        }

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FarmError> {
        if buf.len() < HEADER_BYTES {
            return Err(CommError::ShortFrame { got: buf.len() }.into());
        }

        let tag = LittleEndian::read_i32(&buf[0..]);
        let tag = Tag::from_i32(tag).ok_or(FarmError::Protocol { tag })?;

        if tag == Tag::Terminate {
            return Ok(Message::Terminate);
        }

        let status = LittleEndian::read_i32(&buf[8..]);
        let status = TaskStatus::from_i32(status).ok_or(FarmError::Protocol { tag: status })?;

        let frame = TaskFrame {
            tid: LittleEndian::read_i32(&buf[4..]),
            status,
            location: [
                LittleEndian::read_i32(&buf[12..]) as usize,
                LittleEndian::read_i32(&buf[16..]) as usize,
            ],
            payload: buf[HEADER_BYTES..].to_vec(),
        };

        Ok(match tag {
            Tag::Data => Message::Data(frame),
            Tag::Result => Message::Result(frame),
            Tag::CheckpointEcho => Message::CheckpointEcho(frame),
            Tag::Terminate => unreachable!(),
        })
    }
}

/// Payload length of a data-bearing frame for this task template.
pub fn payload_len(template: &[Schema]) -> usize {
    template
        .iter()
        .filter(|schema| schema.sync)
        .map(|schema| schema.byte_size)
        .sum()
}

/// Full frame length, fixed per pool.
pub fn frame_len(template: &[Schema]) -> usize {
    HEADER_BYTES + payload_len(template)
}

/// Flatten a task into a frame: header fields from the task, payload from
/// its sync banks in declared order.
pub fn pack_task(task: &Task, tag: Tag) -> Message {
    let mut payload = Vec::new();
    for bank in task.storage.iter().filter(|bank| bank.layout.sync) {
        payload.extend_from_slice(&bank.data);
    }

    let frame = TaskFrame {
        tid: task.tid,
        status: task.status,
        location: task.location,
        payload,
    };

    match tag {
        Tag::Terminate => Message::Terminate,
        Tag::Data => Message::Data(frame),
        Tag::Result => Message::Result(frame),
        Tag::CheckpointEcho => Message::CheckpointEcho(frame),
    }
}

/// Exact inverse of [`pack_task`]: rehydrate a task from a frame,
/// splitting the payload back into the sync banks.
pub fn unpack_frame(frame: &TaskFrame, task: &mut Task) -> Result<(), FarmError> {
    let expected: usize = task
        .storage
        .iter()
        .filter(|bank| bank.layout.sync)
        .map(|bank| bank.layout.byte_size)
        .sum();
    if frame.payload.len() != expected {
        return Err(FarmError::Frame {
            expected,
            got: frame.payload.len(),
        });
    }

    task.tid = frame.tid;
    task.status = frame.status;
    task.location = frame.location;

    let mut position = 0;
    for bank in task.storage.iter_mut().filter(|bank| bank.layout.sync) {
        let size = bank.layout.byte_size;
        bank.data.copy_from_slice(&frame.payload[position..position + size]);
        position += size;
    }

    Ok(())
}
