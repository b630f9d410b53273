use nom::error::{Error, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::KeyExchangeAlgorithm;
use crate::buffer::Buf;

/// ClientKeyExchange of the PSK family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub identity: Vec<u8>,
    /// The client's ephemeral X25519 key for ECDHE_PSK.
    pub public_key: Option<Vec<u8>>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchangeAlgorithm) -> IResult<&[u8], ClientKeyExchange> {
        let (input, identity) = length_data(be_u16)(input)?;
        if identity.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, public_key) = match kx {
            KeyExchangeAlgorithm::Psk => (input, None),
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, key) = length_data(be_u8)(input)?;
                if key.is_empty() {
                    return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
                }
                (input, Some(key.to_vec()))
            }
        };

        Ok((
            input,
            ClientKeyExchange {
                identity: identity.to_vec(),
                public_key,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&(self.identity.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.identity);
        if let Some(key) = &self.public_key {
            output.push(key.len() as u8);
            output.extend_from_slice(key);
        }
    }
}
