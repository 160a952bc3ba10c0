//! Binary request/response framing spoken between the swap client and the
//! remote memory server.
//!
//! ```text
//! frame    := body_len:u32le body crc32(body):u32le
//! request  := op:u8 object_id:u64le seq:u64le payload_len:u32le payload
//! response := status:u8 payload_len:u32le payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{FarMemError, ObjectId, Result, SeqNo};

/// Largest frame body either side accepts.
pub const MAX_FRAME_BODY: usize = 16 << 20;

const FRAME_LEN_BYTES: usize = 4;
const FRAME_CRC_BYTES: usize = 4;
const REQUEST_HDR_LEN: usize = 1 + 8 + 8 + 4;
const RESPONSE_HDR_LEN: usize = 1 + 4;

/// Request opcode.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    /// Read the latest record of an object.
    Fetch = 1,
    /// Store a new record for an object.
    WriteBack = 2,
}

impl TryFrom<u8> for Op {
    type Error = FarMemError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Op::Fetch),
            2 => Ok(Op::WriteBack),
            _ => Err(FarMemError::Protocol("unknown request opcode")),
        }
    }
}

/// Response status.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// Request applied; FETCH responses carry the payload.
    Ok = 0,
    /// No record exists for the object.
    NotFound = 1,
    /// Server-side failure; payload holds a UTF-8 message.
    Error = 2,
}

impl TryFrom<u8> for Status {
    type Error = FarMemError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::NotFound),
            2 => Ok(Status::Error),
            _ => Err(FarMemError::Protocol("unknown response status")),
        }
    }
}

/// A request addressed to the remote pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    /// Operation to perform.
    pub op: Op,
    /// Target object.
    pub object_id: ObjectId,
    /// Per-client monotonically increasing sequence number.
    pub seq: SeqNo,
    /// Object bytes for WRITE_BACK, empty for FETCH.
    pub payload: Bytes,
}

/// The remote pool's answer to one request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    /// Outcome.
    pub status: Status,
    /// Object bytes for FETCH, message for ERROR, empty otherwise.
    pub payload: Bytes,
}

impl Request {
    /// Builds a FETCH request.
    pub fn fetch(object_id: ObjectId, seq: SeqNo) -> Self {
        Self {
            op: Op::Fetch,
            object_id,
            seq,
            payload: Bytes::new(),
        }
    }

    /// Builds a WRITE_BACK request.
    pub fn write_back(object_id: ObjectId, seq: SeqNo, payload: impl Into<Bytes>) -> Self {
        Self {
            op: Op::WriteBack,
            object_id,
            seq,
            payload: payload.into(),
        }
    }

    /// Appends the frame body for this request.
    pub fn encode_body(&self, dst: &mut BytesMut) {
        dst.reserve(REQUEST_HDR_LEN + self.payload.len());
        dst.put_u8(self.op as u8);
        dst.put_u64_le(self.object_id.0);
        dst.put_u64_le(self.seq.0);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Decodes a frame body.
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.remaining() < REQUEST_HDR_LEN {
            return Err(FarMemError::Protocol("truncated request header"));
        }
        let op = Op::try_from(body.get_u8())?;
        let object_id = ObjectId(body.get_u64_le());
        let seq = SeqNo(body.get_u64_le());
        let len = body.get_u32_le() as usize;
        if body.remaining() != len {
            return Err(FarMemError::Protocol("request payload length mismatch"));
        }
        if op == Op::Fetch && len != 0 {
            return Err(FarMemError::Protocol("fetch request carries payload"));
        }
        Ok(Self {
            op,
            object_id,
            seq,
            payload: body,
        })
    }
}

impl Response {
    /// Successful response carrying `payload`.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            payload: payload.into(),
        }
    }

    /// NOT_FOUND response.
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: Bytes::new(),
        }
    }

    /// ERROR response with a message.
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// Appends the frame body for this response.
    pub fn encode_body(&self, dst: &mut BytesMut) {
        dst.reserve(RESPONSE_HDR_LEN + self.payload.len());
        dst.put_u8(self.status as u8);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Decodes a frame body.
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.remaining() < RESPONSE_HDR_LEN {
            return Err(FarMemError::Protocol("truncated response header"));
        }
        let status = Status::try_from(body.get_u8())?;
        let len = body.get_u32_le() as usize;
        if body.remaining() != len {
            return Err(FarMemError::Protocol("response payload length mismatch"));
        }
        Ok(Self {
            status,
            payload: body,
        })
    }

    /// Error message carried by an ERROR response.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Wraps an encoded body into a length-prefixed, checksummed frame.
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > MAX_FRAME_BODY {
        return Err(FarMemError::Protocol("frame body too large"));
    }
    dst.reserve(FRAME_LEN_BYTES + body.len() + FRAME_CRC_BYTES);
    dst.put_u32_le(body.len() as u32);
    dst.put_slice(body);
    dst.put_u32_le(crc32fast::hash(body));
    Ok(())
}

/// Reads one frame body. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; FRAME_LEN_BYTES];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BODY {
        return Err(FarMemError::Protocol("frame body too large"));
    }
    let mut buf = BytesMut::zeroed(len + FRAME_CRC_BYTES);
    reader.read_exact(&mut buf).await?;
    let crc_bytes = buf.split_off(len);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(&buf) != expected {
        return Err(FarMemError::Protocol("frame checksum mismatch"));
    }
    Ok(Some(buf.freeze()))
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = BytesMut::new();
    encode_frame(body, &mut frame)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes and writes a request frame.
pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = BytesMut::new();
    request.encode_body(&mut body);
    write_frame(writer, &body).await
}

/// Encodes and writes a response frame.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = BytesMut::new();
    response.encode_body(&mut body);
    write_frame(writer, &body).await
}
