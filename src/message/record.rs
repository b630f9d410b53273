//! Record header and framing.

use std::fmt;

use super::ProtocolVersion;
use crate::buffer::Buf;
use crate::types::{ContentType, Sequence};
use crate::util::be_u48;
use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::{Err, IResult};

/// A record borrowed from an incoming datagram.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct DTLSRecord<'a> {
    /// The content type of this record.
    pub content_type: ContentType,
    /// The protocol version.
    pub version: ProtocolVersion,
    /// The epoch and sequence number.
    pub sequence: Sequence,
    /// The record body. For protected records this starts with the explicit nonce.
    pub fragment: &'a [u8],
}

impl<'a> DTLSRecord<'a> {
    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const HEADER_LEN: usize = 13;

    /// Records longer than 2^14 + 2048 are never valid.
    pub const MAX_FRAGMENT_LEN: usize = 16384 + 2048;

    /// Parse one record from the front of `input`.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], DTLSRecord<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (rest, version) = ProtocolVersion::parse(input)?;

        // DTLS 1.0 is accepted in the record layer for compatibility. The
        // negotiated version lives in the hellos.
        if !matches!(version, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2) {
            return Err(Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }

        let (rest, epoch) = be_u16(rest)?;
        let (rest, sequence_number) = be_u48(rest)?;
        let (rest, length) = be_u16(rest)?;

        if length as usize > Self::MAX_FRAGMENT_LEN {
            return Err(Err::Failure(nom::error::Error::new(
                rest,
                nom::error::ErrorKind::TooLarge,
            )));
        }

        let (rest, fragment) = take(length as usize)(rest)?;

        Ok((
            rest,
            DTLSRecord {
                content_type,
                version,
                sequence: Sequence::new(epoch, sequence_number),
                fragment,
            },
        ))
    }

    /// Write a record header. The caller appends `length` bytes of body.
    pub fn serialize_header(
        content_type: ContentType,
        sequence: Sequence,
        length: u16,
        output: &mut Buf,
    ) {
        output.push(content_type.as_u8());
        ProtocolVersion::DTLS1_2.serialize(output);
        output.extend_from_slice(&sequence.to_explicit());
        output.extend_from_slice(&length.to_be_bytes());
    }

    /// Serialize this record to the output buffer.
    pub fn serialize(&self, output: &mut Buf) {
        Self::serialize_header(
            self.content_type,
            self.sequence,
            self.fragment.len() as u16,
            output,
        );
        output.extend_from_slice(self.fragment);
    }
}

impl fmt::Debug for DTLSRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DTLSRecord")
            .field("content_type", &self.content_type)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("length", &self.fragment.len())
            .finish()
    }
}
