use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use super::{ClientHello, ClientKeyExchange, Finished, HelloVerifyRequest, KeyExchangeAlgorithm};
use super::{ServerHello, ServerKeyExchange};
use crate::buffer::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    HelloRequest,
    #[default]
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    ServerKeyExchange,
    ServerHelloDone,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::HelloRequest,
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            12 => MessageType::ServerKeyExchange,
            14 => MessageType::ServerHelloDone,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::HelloRequest => 0,
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::ServerKeyExchange => 12,
            MessageType::ServerHelloDone => 14,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, value) = be_u8(input)?;
        Ok((input, Self::from_u8(value)))
    }
}

/// Handshake fragment header.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    /// type(1) + length(3) + message_seq(2) + fragment_offset(3) + fragment_length(3)
    pub const LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.msg_type.as_u8());
        output.extend_from_slice(&self.length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
    }

    /// Whether this header describes a whole message.
    pub fn is_complete(&self) -> bool {
        self.fragment_offset == 0 && self.fragment_length == self.length
    }
}

/// One handshake fragment borrowed from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub header: Header,
    pub body: &'a [u8],
}

impl<'a> Fragment<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Fragment<'a>> {
        let (rest, header) = Header::parse(input)?;

        let end = header.fragment_offset as u64 + header.fragment_length as u64;
        if end > header.length as u64 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (rest, body) = take(header.fragment_length as usize)(rest)?;
        Ok((rest, Fragment { header, body }))
    }

    /// Parse every fragment of a handshake record.
    pub fn parse_all(mut input: &'a [u8]) -> IResult<&'a [u8], Vec<Fragment<'a>>> {
        let mut fragments = Vec::new();
        while !input.is_empty() {
            let (rest, fragment) = Self::parse(input)?;
            fragments.push(fragment);
            input = rest;
        }
        if fragments.is_empty() {
            return Err(Err::Error(Error::new(input, ErrorKind::Eof)));
        }
        Ok((input, fragments))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.header.serialize(output);
        output.extend_from_slice(self.body);
    }
}

/// Parsed handshake message bodies.
#[derive(Debug, PartialEq, Eq)]
pub enum Body {
    HelloRequest,
    ClientHello(ClientHello),
    HelloVerifyRequest(HelloVerifyRequest),
    ServerHello(ServerHello),
    ServerKeyExchange(ServerKeyExchange),
    ServerHelloDone,
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl Body {
    /// Parse a reassembled body. The whole input must be consumed.
    ///
    /// The key exchange messages need the negotiated key exchange to be parsed.
    pub fn parse(
        msg_type: MessageType,
        input: &[u8],
        kx: Option<KeyExchangeAlgorithm>,
    ) -> IResult<&[u8], Body> {
        let (rest, body) = match msg_type {
            MessageType::HelloRequest => (input, Body::HelloRequest),
            MessageType::ClientHello => {
                let (rest, m) = ClientHello::parse(input)?;
                (rest, Body::ClientHello(m))
            }
            MessageType::HelloVerifyRequest => {
                let (rest, m) = HelloVerifyRequest::parse(input)?;
                (rest, Body::HelloVerifyRequest(m))
            }
            MessageType::ServerHello => {
                let (rest, m) = ServerHello::parse(input)?;
                (rest, Body::ServerHello(m))
            }
            MessageType::ServerKeyExchange => {
                let kx = kx.ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Verify)))?;
                let (rest, m) = ServerKeyExchange::parse(input, kx)?;
                (rest, Body::ServerKeyExchange(m))
            }
            MessageType::ServerHelloDone => (input, Body::ServerHelloDone),
            MessageType::ClientKeyExchange => {
                let kx = kx.ok_or_else(|| Err::Failure(Error::new(input, ErrorKind::Verify)))?;
                let (rest, m) = ClientKeyExchange::parse(input, kx)?;
                (rest, Body::ClientKeyExchange(m))
            }
            MessageType::Finished => {
                let (rest, m) = Finished::parse(input)?;
                (rest, Body::Finished(m))
            }
            MessageType::Unknown(_) => {
                return Err(Err::Failure(Error::new(input, ErrorKind::Switch)));
            }
        };

        if !rest.is_empty() {
            return Err(Err::Failure(Error::new(rest, ErrorKind::Eof)));
        }

        Ok((rest, body))
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Body::HelloRequest => MessageType::HelloRequest,
            Body::ClientHello(_) => MessageType::ClientHello,
            Body::HelloVerifyRequest(_) => MessageType::HelloVerifyRequest,
            Body::ServerHello(_) => MessageType::ServerHello,
            Body::ServerKeyExchange(_) => MessageType::ServerKeyExchange,
            Body::ServerHelloDone => MessageType::ServerHelloDone,
            Body::ClientKeyExchange(_) => MessageType::ClientKeyExchange,
            Body::Finished(_) => MessageType::Finished,
        }
    }

    pub fn serialize(&self, output: &mut Buf) {
        match self {
            Body::HelloRequest | Body::ServerHelloDone => {}
            Body::ClientHello(m) => m.serialize(output),
            Body::HelloVerifyRequest(m) => m.serialize(output),
            Body::ServerHello(m) => m.serialize(output),
            Body::ServerKeyExchange(m) => m.serialize(output),
            Body::ClientKeyExchange(m) => m.serialize(output),
            Body::Finished(m) => m.serialize(output),
        }
    }
}
