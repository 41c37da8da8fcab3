//! The frame format spoken between the game process and the display process.
//!
//! A frame is a message id byte, an argument count byte, and that many strings. Each string is
//! a big-endian `u16` byte length followed by UTF-8 data:
//!
//! ```text
//! [u8 id][u8 argc] ([u16 len][len bytes])*
//! ```

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use strum::{Display, FromRepr};
use thiserror::Error;

use crate::progress::{CustomOp, ProgressError, ProgressEvent};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error")]
    Io(#[from] io::Error),

    #[error("unknown message id {0}")]
    UnknownMessage(u8),

    #[error("frame has {0} arguments, but at most 255 fit")]
    TooManyArgs(usize),

    #[error("argument is {0} bytes long, but at most 65535 fit")]
    ArgTooLong(usize),

    #[error("argument is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("message {id} takes {expected} arguments, but {found} were sent")]
    WrongArgCount {
        id: MessageId,
        expected: usize,
        found: usize,
    },

    #[error("'{0}' is not a valid number")]
    BadNumber(String),

    #[error("invalid custom bar operation")]
    BadOperation(#[from] ProgressError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display)]
#[repr(u8)]
pub enum MessageId {
    BeginEntrypointType = 0,
    BeginSingleEntrypoint = 1,
    EndEntrypointType = 2,
    MemoryUsage = 3,
    CreateCustomBar = 4,
    CustomBarOp = 5,
    SetTitle = 6,
    Shutdown = 255,
}

/// A decoded but not yet interpreted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: MessageId,
    pub args: Vec<String>,
}

impl Frame {
    pub fn new(id: MessageId, args: Vec<String>) -> Frame {
        Frame { id, args }
    }

    /// Writes the frame. Nothing is written if the frame can't be represented.
    pub fn write(&self, writer: &mut impl Write) -> Result<(), ProtocolError> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Encodes the whole frame up front so that a failure never leaves half a frame on the
    /// wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let argc = u8::try_from(self.args.len())
            .map_err(|_| ProtocolError::TooManyArgs(self.args.len()))?;

        let payload: usize = self.args.iter().map(|arg| arg.len() + 2).sum();

        let mut bytes = Vec::with_capacity(2 + payload);
        bytes.write_u8(self.id as u8)?;
        bytes.write_u8(argc)?;

        for arg in &self.args {
            let len = u16::try_from(arg.len()).map_err(|_| ProtocolError::ArgTooLong(arg.len()))?;

            bytes.write_u16::<BE>(len)?;
            bytes.extend_from_slice(arg.as_bytes());
        }

        Ok(bytes)
    }

    /// Reads the next frame. Returns `None` if the stream ended cleanly between frames.
    pub fn read(reader: &mut impl Read) -> Result<Option<Frame>, ProtocolError> {
        let raw_id = match reader.read_u8() {
            Ok(id) => id,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let id = MessageId::from_repr(raw_id).ok_or(ProtocolError::UnknownMessage(raw_id))?;
        let argc = reader.read_u8()?;

        let mut args = Vec::with_capacity(argc as usize);

        for _ in 0..argc {
            let len = reader.read_u16::<BE>()?;

            let mut arg = vec![0u8; len as usize];
            reader.read_exact(&mut arg)?;

            args.push(String::from_utf8(arg)?);
        }

        Ok(Some(Frame { id, args }))
    }
}

fn number<T: std::str::FromStr>(arg: &str) -> Result<T, ProtocolError> {
    arg.parse()
        .map_err(|_| ProtocolError::BadNumber(arg.to_string()))
}

impl From<&ProgressEvent> for Frame {
    fn from(event: &ProgressEvent) -> Frame {
        match event {
            ProgressEvent::BeginEntrypointType {
                name,
                type_name,
                count,
            } => Frame::new(
                MessageId::BeginEntrypointType,
                vec![name.clone(), type_name.clone(), count.to_string()],
            ),

            ProgressEvent::BeginSingleEntrypoint {
                type_name,
                type_type,
                unit_id,
                unit_name,
            } => Frame::new(
                MessageId::BeginSingleEntrypoint,
                vec![
                    type_name.clone(),
                    type_type.clone(),
                    unit_id.clone(),
                    unit_name.clone(),
                ],
            ),

            ProgressEvent::EndEntrypointType { name } => {
                Frame::new(MessageId::EndEntrypointType, vec![name.clone()])
            }

            ProgressEvent::MemoryUsage { usage, total } => Frame::new(
                MessageId::MemoryUsage,
                vec![usage.to_string(), total.to_string()],
            ),

            ProgressEvent::CreateCustomBar { id, title, max } => Frame::new(
                MessageId::CreateCustomBar,
                vec![id.clone(), title.clone(), max.to_string()],
            ),

            ProgressEvent::CustomBarOp { id, op } => {
                let name: &'static str = op.kind().into();

                let mut args = vec![id.clone(), name.to_string()];
                args.extend(op.args());

                Frame::new(MessageId::CustomBarOp, args)
            }

            ProgressEvent::SetTitle(title) => Frame::new(MessageId::SetTitle, vec![title.clone()]),

            ProgressEvent::Shutdown => Frame::new(MessageId::Shutdown, vec![]),
        }
    }
}

impl TryFrom<Frame> for ProgressEvent {
    type Error = ProtocolError;

    fn try_from(frame: Frame) -> Result<ProgressEvent, ProtocolError> {
        Ok(match frame.id {
            MessageId::BeginEntrypointType => {
                let [name, type_name, count]: [String; 3] = take_args(frame)?;

                ProgressEvent::BeginEntrypointType {
                    count: number(&count)?,
                    name,
                    type_name,
                }
            }

            MessageId::BeginSingleEntrypoint => {
                let [type_name, type_type, unit_id, unit_name]: [String; 4] =
                    take_args(frame)?;

                ProgressEvent::BeginSingleEntrypoint {
                    type_name,
                    type_type,
                    unit_id,
                    unit_name,
                }
            }

            MessageId::EndEntrypointType => {
                let [name]: [String; 1] = take_args(frame)?;

                ProgressEvent::EndEntrypointType { name }
            }

            MessageId::MemoryUsage => {
                let [usage, total]: [String; 2] = take_args(frame)?;

                ProgressEvent::MemoryUsage {
                    usage: number(&usage)?,
                    total: number(&total)?,
                }
            }

            MessageId::CreateCustomBar => {
                let [id, title, max]: [String; 3] = take_args(frame)?;

                ProgressEvent::CreateCustomBar {
                    max: number(&max)?,
                    id,
                    title,
                }
            }

            MessageId::CustomBarOp => {
                if frame.args.len() < 2 {
                    return Err(ProtocolError::WrongArgCount {
                        id: frame.id,
                        expected: 2,
                        found: frame.args.len(),
                    });
                }

                let mut args = frame.args.into_iter();
                let id = args.next().unwrap_or_default();
                let op_name = args.next().unwrap_or_default();
                let rest: Vec<String> = args.collect();

                ProgressEvent::CustomBarOp {
                    op: CustomOp::parse(&op_name, &rest)?,
                    id,
                }
            }

            MessageId::SetTitle => {
                let [title]: [String; 1] = take_args(frame)?;

                ProgressEvent::SetTitle(title)
            }

            MessageId::Shutdown => ProgressEvent::Shutdown,
        })
    }
}

/// Splits a frame into exactly `N` arguments.
fn take_args<const N: usize>(frame: Frame) -> Result<[String; N], ProtocolError> {
    let Frame { id, args } = frame;
    let found = args.len();

    args.try_into().map_err(|_| ProtocolError::WrongArgCount {
        id,
        expected: N,
        found,
    })
}

/// Encodes an event straight to bytes.
pub fn encode(event: &ProgressEvent) -> Result<Vec<u8>, ProtocolError> {
    Frame::from(event).to_bytes()
}

/// Reads and interprets the next event. `None` means the stream ended cleanly.
pub fn decode(reader: &mut impl Read) -> Result<Option<ProgressEvent>, ProtocolError> {
    match Frame::read(reader)? {
        Some(frame) => Ok(Some(ProgressEvent::try_from(frame)?)),
        None => Ok(None),
    }
}
