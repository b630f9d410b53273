use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{CipherSuite, Cookie, Extension, ExtensionType, ProtocolVersion, Random, SessionId};
use crate::buffer::Buf;
use crate::types::NamedGroup;

/// The null compression method, the only one we speak.
const COMPRESSION_NULL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn new(random: Random, cookie: Cookie, cipher_suites: &[CipherSuite]) -> Self {
        let mut extensions = Vec::new();
        if cipher_suites.iter().any(|cs| cs.needs_ecdhe()) {
            extensions.push(Extension::supported_groups(&[NamedGroup::X25519]));
        }
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random,
            session_id: SessionId::empty(),
            cookie,
            cipher_suites: cipher_suites.to_vec(),
            compression_methods: vec![COMPRESSION_NULL],
            extensions,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, suites_len) = be_u16(input)?;
        if suites_len == 0 || suites_len % 2 != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, suites) = take(suites_len as usize)(input)?;
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| CipherSuite::from_u16(u16::from_be_bytes([c[0], c[1]])))
            .collect();

        let (input, methods_len) = be_u8(input)?;
        if methods_len == 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, methods) = take(methods_len as usize)(input)?;

        let (input, extensions) = Extension::parse_list(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods: methods.to_vec(),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);
        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.as_u16().to_be_bytes());
        }
        output.push(self.compression_methods.len() as u8);
        output.extend_from_slice(&self.compression_methods);
        Extension::serialize_list(&self.extensions, output);
    }

    pub fn offers_null_compression(&self) -> bool {
        self.compression_methods.contains(&COMPRESSION_NULL)
    }

    /// Whether the client can do an X25519 exchange. Clients that do not
    /// list groups are assumed to support it.
    pub fn supports_group(&self, group: NamedGroup) -> bool {
        self.extensions
            .iter()
            .find(|e| e.extension_type == ExtensionType::SupportedGroups)
            .and_then(|e| e.groups())
            .map(|groups| groups.contains(&group))
            .unwrap_or(true)
    }
}
