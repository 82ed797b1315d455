//! Diagnostic IPC wire format
//!
//! Every message is a 20 byte header followed by a command specific
//! payload. All integers are little endian; strings are a `u32` count of
//! UTF-16 code units (including the terminating NUL) followed by the code
//! units themselves.
//!
//! ```text
//! +----------------+--------+-----+----+----------+
//! | magic (14)     | size   | set | id | reserved |
//! | DOTNET_IPC_V1\0| u16    | u8  | u8 | u16      |
//! +----------------+--------+-----+----+----------+
//! ```

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::core::{AttachRequest, HResult};

pub const MAGIC: &[u8; 14] = b"DOTNET_IPC_V1\0";
pub const HEADER_SIZE: usize = 20;

/// Command set / command id pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub set: u8,
    pub id: u8,
}

impl Command {
    pub const ATTACH_PROFILER: Self = Self { set: 0x03, id: 0x01 };
    pub const PROCESS_INFO2: Self = Self { set: 0x04, id: 0x04 };
    pub const SERVER_OK: Self = Self { set: 0xFF, id: 0x00 };
    pub const SERVER_ERROR: Self = Self { set: 0xFF, id: 0xFF };
}

/// A complete message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl IpcMessage {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let size = u16::try_from(HEADER_SIZE + self.payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} byte payload does not fit in one message", self.payload.len()),
            )
        })?;

        let mut buf = Vec::with_capacity(size as usize);
        buf.extend_from_slice(MAGIC);
        buf.write_u16::<LittleEndian>(size)?;
        buf.write_u8(self.command.set)?;
        buf.write_u8(self.command.id)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()?)?;
        writer.flush()
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 14];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid_data("bad magic in diagnostic IPC header"));
        }

        let size = reader.read_u16::<LittleEndian>()? as usize;
        let set = reader.read_u8()?;
        let id = reader.read_u8()?;
        let _reserved = reader.read_u16::<LittleEndian>()?;

        if size < HEADER_SIZE {
            return Err(invalid_data(format!("message size {} below header size", size)));
        }

        let mut payload = vec![0u8; size - HEADER_SIZE];
        reader.read_exact(&mut payload)?;

        Ok(Self {
            command: Command { set, id },
            payload,
        })
    }
}

/// Server reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Vec<u8>),
    Error(HResult),
}

impl Response {
    pub fn from_message(message: IpcMessage) -> io::Result<Self> {
        match message.command {
            Command::SERVER_OK => Ok(Self::Ok(message.payload)),
            Command::SERVER_ERROR => {
                let code = (&message.payload[..]).read_i32::<LittleEndian>()?;
                Ok(Self::Error(HResult(code)))
            }
            other => Err(invalid_data(format!(
                "unexpected reply command {:#04x}/{:#04x}",
                other.set, other.id
            ))),
        }
    }

    /// Status carried by the reply. An OK reply may carry an HRESULT of its own.
    pub fn status(&self) -> HResult {
        match self {
            Self::Ok(payload) => (&payload[..])
                .read_i32::<LittleEndian>()
                .map(HResult)
                .unwrap_or(HResult::S_OK),
            Self::Error(status) => *status,
        }
    }
}

/// AttachProfiler request
pub fn attach_profiler(request: &AttachRequest<'_>) -> io::Result<IpcMessage> {
    let profiler = request.profiler;
    let mut payload = Vec::new();

    payload.write_u32::<LittleEndian>(request.timeout.as_millis())?;
    payload.extend_from_slice(&profiler.component_id().to_bytes_le());
    write_string(&mut payload, &profiler.image_path().to_string_lossy())?;
    payload.write_u32::<LittleEndian>(profiler.init_payload_len())?;
    payload.extend_from_slice(profiler.init_payload());

    Ok(IpcMessage::new(Command::ATTACH_PROFILER, payload))
}

/// ProcessInfo2 request (empty payload)
pub fn process_info() -> IpcMessage {
    IpcMessage::new(Command::PROCESS_INFO2, Vec::new())
}

/// ProcessInfo2 reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process_id: u64,
    pub runtime_cookie: Uuid,
    pub command_line: String,
    pub os: String,
    pub arch: String,
    pub entrypoint_assembly: String,
    pub clr_product_version: String,
}

impl ProcessInfo {
    pub fn parse(payload: &[u8]) -> io::Result<Self> {
        let mut reader = payload;

        let process_id = reader.read_u64::<LittleEndian>()?;
        let mut cookie = [0u8; 16];
        reader.read_exact(&mut cookie)?;

        Ok(Self {
            process_id,
            runtime_cookie: Uuid::from_bytes_le(cookie),
            command_line: read_string(&mut reader)?,
            os: read_string(&mut reader)?,
            arch: read_string(&mut reader)?,
            entrypoint_assembly: read_string(&mut reader)?,
            clr_product_version: read_string(&mut reader)?,
        })
    }

    /// Product version without build metadata (`8.0.1+abcdef` -> `8.0.1`)
    pub fn runtime_version(&self) -> &str {
        self.clr_product_version
            .split('+')
            .next()
            .unwrap_or_default()
    }
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
    writer.write_u32::<LittleEndian>(units.len() as u32)?;
    for unit in units {
        writer.write_u16::<LittleEndian>(unit)?;
    }
    Ok(())
}

pub fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    if len == 0 {
        return Ok(String::new());
    }

    let mut units = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        units.push(reader.read_u16::<LittleEndian>()?);
    }
    if units.last() == Some(&0) {
        units.pop();
    }

    Ok(String::from_utf16_lossy(&units))
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
