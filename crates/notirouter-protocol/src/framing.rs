//! Binary codec and stream framing.
//!
//! [`encode`] and [`decode`] translate single messages to and from byte
//! buffers. [`FrameReader`] pulls messages one at a time off a byte stream,
//! keeping the exact bytes of each message so they can be relayed untouched.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Address, ListingEntry, Message, RegisterOutcome};
use crate::{
    DISCONNECT_CODE, LISTING_CODE, LISTING_REPLY_CODE, MAX_LISTING_ENTRIES, MAX_NAME_LEN,
    MAX_PAYLOAD_LEN, NOTIFICATION_CODE, REGISTER_CODE, REGISTER_REPLY_CODE,
};

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 512;

/// Encodes a message into its wire form.
///
/// # Example
///
/// ```rust
/// use notirouter_protocol::{Address, Message, encode};
///
/// let bytes = encode(&Message::notification("bob", Address::new(5), "hi")).unwrap();
/// assert_eq!(bytes, b"N\x03bob\x05\x00\x02hi");
/// ```
pub fn encode(message: &Message) -> ProtocolResult<Vec<u8>> {
    let mut buffer = vec![message.discriminant()];

    match message {
        Message::Notification {
            emitter,
            receptor,
            payload,
        } => {
            put_name(&mut buffer, "emitter", emitter)?;
            buffer.push(receptor.get());
            check_len("payload", payload.len(), MAX_PAYLOAD_LEN)?;
            buffer.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            buffer.extend_from_slice(payload);
        }
        Message::Listing { requested_count } => buffer.push(*requested_count),
        Message::ListingReply { entries } => {
            check_len("listing", entries.len(), MAX_LISTING_ENTRIES)?;
            buffer.extend_from_slice(&(entries.len() as u16).to_be_bytes());
            for entry in entries {
                buffer.push(entry.address.get());
                put_name(&mut buffer, "name", &entry.name)?;
            }
        }
        Message::Register {
            requested_address,
            name,
        } => {
            buffer.push(requested_address.get());
            put_name(&mut buffer, "name", name)?;
        }
        Message::RegisterReply {
            outcome,
            assigned_address,
        } => {
            buffer.push(outcome.code());
            buffer.push(assigned_address.get());
        }
        Message::Disconnect | Message::Unknown { .. } => {}
    }

    Ok(buffer)
}

/// Decodes the message at the start of `data`.
///
/// Trailing bytes after the message are ignored; use [`decode_frame`] to
/// learn how many bytes the message occupied.
pub fn decode(data: &[u8]) -> ProtocolResult<Message> {
    decode_frame(data).map(|(message, _)| message)
}

/// Decodes the message at the start of `data` and returns it together with
/// its encoded length.
pub fn decode_frame(data: &[u8]) -> ProtocolResult<(Message, usize)> {
    let Some(&code) = data.first() else {
        return Err(ProtocolError::EmptyMessage);
    };

    let frame = match code {
        NOTIFICATION_CODE => {
            let mut fields = FieldReader::new(data, "notification");
            let emitter = fields.name("emitter")?;
            let receptor = Address::new(fields.u8()?);
            let len = fields.u16()? as usize;
            let payload = fields.take(len)?.to_vec();
            (
                Message::Notification {
                    emitter,
                    receptor,
                    payload,
                },
                fields.pos,
            )
        }
        LISTING_CODE => {
            let mut fields = FieldReader::new(data, "listing");
            let requested_count = fields.u8()?;
            (Message::Listing { requested_count }, fields.pos)
        }
        LISTING_REPLY_CODE => {
            let mut fields = FieldReader::new(data, "listing reply");
            let count = fields.u16()? as usize;
            let mut entries = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                let address = Address::new(fields.u8()?);
                let name = fields.name("name")?;
                entries.push(ListingEntry { address, name });
            }
            (Message::ListingReply { entries }, fields.pos)
        }
        REGISTER_CODE => {
            let mut fields = FieldReader::new(data, "register");
            let requested_address = Address::new(fields.u8()?);
            let name = fields.name("name")?;
            (
                Message::Register {
                    requested_address,
                    name,
                },
                fields.pos,
            )
        }
        REGISTER_REPLY_CODE => {
            let mut fields = FieldReader::new(data, "register reply");
            let code = fields.u8()?;
            let outcome =
                RegisterOutcome::from_code(code).ok_or(ProtocolError::InvalidOutcome(code))?;
            let assigned_address = Address::new(fields.u8()?);
            (
                Message::RegisterReply {
                    outcome,
                    assigned_address,
                },
                fields.pos,
            )
        }
        DISCONNECT_CODE => (Message::Disconnect, 1),
        raw_first_byte => (Message::Unknown { raw_first_byte }, 1),
    };

    Ok(frame)
}

fn check_len(field: &'static str, len: usize, max: usize) -> ProtocolResult<()> {
    if len > max {
        return Err(ProtocolError::FieldTooLong { field, len, max });
    }
    Ok(())
}

fn put_name(buffer: &mut Vec<u8>, field: &'static str, name: &str) -> ProtocolResult<()> {
    check_len(field, name.len(), MAX_NAME_LEN)?;
    buffer.push(name.len() as u8);
    buffer.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Bounds-checked cursor over a message body. Starts after the discriminant.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
    kind: &'static str,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8], kind: &'static str) -> Self {
        Self { data, pos: 1, kind }
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ProtocolError::TruncatedMessage {
                kind: self.kind,
                expected: end,
                received: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ProtocolResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn name(&mut self, field: &'static str) -> ProtocolResult<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
    }
}

/// A decoded message together with the exact bytes it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The decoded message.
    pub message: Message,
    /// Wire bytes of the message.
    pub raw: Vec<u8>,
}

/// Reads messages from a byte stream.
///
/// Bytes read past the end of one message are kept for the next call, so a
/// reader can be dropped mid-read (for example inside `tokio::select!`)
/// without losing data.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new FrameReader wrapping the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            eof: false,
        }
    }

    async fn fill(&mut self) -> ProtocolResult<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Returns the discriminant of the next message without consuming it.
    ///
    /// Returns `Ok(None)` if the stream ended before any byte arrived.
    pub async fn peek_discriminant(&mut self) -> ProtocolResult<Option<u8>> {
        while self.buffer.is_empty() {
            if self.eof || self.fill().await? == 0 {
                return Ok(None);
            }
        }
        Ok(Some(self.buffer[0]))
    }

    /// Reads a single message.
    ///
    /// Returns `Ok(None)` on a clean EOF before any bytes. Returns
    /// `TruncatedMessage` if the stream ends in the middle of a message.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<Frame>> {
        if self.peek_discriminant().await?.is_none() {
            return Ok(None);
        }

        loop {
            match decode_frame(&self.buffer) {
                Ok((message, len)) => {
                    let raw: Vec<u8> = self.buffer.drain(..len).collect();
                    return Ok(Some(Frame { message, raw }));
                }
                Err(e) if e.is_truncated() && !self.eof => {
                    self.fill().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads a single message, discarding its raw bytes.
    pub async fn read_message(&mut self) -> ProtocolResult<Option<Message>> {
        Ok(self.read_frame().await?.map(|frame| frame.message))
    }
}

/// Writes messages to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encodes and writes a single message, then flushes.
    pub async fn write_message(&mut self, message: &Message) -> ProtocolResult<()> {
        let data = encode(message)?;
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
