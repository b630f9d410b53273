use nom::error::{Error, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::KeyExchangeAlgorithm;
use crate::buffer::Buf;
use crate::types::NamedGroup;

/// ECParameters curve_type for a named curve.
const CURVE_TYPE_NAMED: u8 = 3;

/// Ephemeral ECDH parameters of an ECDHE_PSK ServerKeyExchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    pub group: NamedGroup,
    pub public_key: Vec<u8>,
}

/// ServerKeyExchange of the PSK family.
///
/// Plain PSK carries only the identity hint. ECDHE_PSK adds the server's
/// ephemeral public key. Neither is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub identity_hint: Vec<u8>,
    pub ecdh: Option<EcdhParams>,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchangeAlgorithm) -> IResult<&[u8], ServerKeyExchange> {
        let (input, hint) = length_data(be_u16)(input)?;

        let (input, ecdh) = match kx {
            KeyExchangeAlgorithm::Psk => (input, None),
            KeyExchangeAlgorithm::EcdhePsk => {
                let (input, curve_type) = be_u8(input)?;
                if curve_type != CURVE_TYPE_NAMED {
                    return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
                }
                let (input, group) = NamedGroup::parse(input)?;
                let (input, public_key) = length_data(be_u8)(input)?;
                if public_key.is_empty() {
                    return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
                }
                (
                    input,
                    Some(EcdhParams {
                        group,
                        public_key: public_key.to_vec(),
                    }),
                )
            }
        };

        Ok((
            input,
            ServerKeyExchange {
                identity_hint: hint.to_vec(),
                ecdh,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&(self.identity_hint.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.identity_hint);
        if let Some(ecdh) = &self.ecdh {
            output.push(CURVE_TYPE_NAMED);
            output.extend_from_slice(&ecdh.group.as_u16().to_be_bytes());
            output.push(ecdh.public_key.len() as u8);
            output.extend_from_slice(&ecdh.public_key);
        }
    }
}
