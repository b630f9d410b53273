use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::NamedGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    SupportedGroups,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            10 => ExtensionType::SupportedGroups,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::SupportedGroups => 10,
            ExtensionType::Unknown(value) => *value,
        }
    }
}

/// A hello extension. Only supported_groups is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn supported_groups(groups: &[NamedGroup]) -> Self {
        let mut data = Vec::with_capacity(2 + groups.len() * 2);
        data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
        for group in groups {
            data.extend_from_slice(&group.as_u16().to_be_bytes());
        }
        Extension {
            extension_type: ExtensionType::SupportedGroups,
            data,
        }
    }

    /// Groups listed in a supported_groups extension.
    pub fn groups(&self) -> Option<Vec<NamedGroup>> {
        if self.extension_type != ExtensionType::SupportedGroups {
            return None;
        }
        let (_, list) = length_data::<_, _, Error<&[u8]>, _>(be_u16)(&self.data[..]).ok()?;
        if list.len() % 2 != 0 {
            return None;
        }
        Some(
            list.chunks_exact(2)
                .map(|c| NamedGroup::from_u16(u16::from_be_bytes([c[0], c[1]])))
                .collect(),
        )
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, extension_type) = be_u16(input)?;
        let (input, data) = length_data(be_u16)(input)?;
        Ok((
            input,
            Extension {
                extension_type: ExtensionType::from_u16(extension_type),
                data: data.to_vec(),
            },
        ))
    }

    /// Parse the optional extensions block at the end of a hello.
    pub fn parse_list(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
        if input.is_empty() {
            return Ok((input, Vec::new()));
        }
        let (input, total) = be_u16(input)?;
        let (input, mut block) = take(total as usize)(input)?;
        let mut extensions = Vec::new();
        while !block.is_empty() {
            let (rest, ext) = Self::parse(block)?;
            if extensions.iter().any(|e: &Extension| e.extension_type == ext.extension_type) {
                return Err(Err::Failure(Error::new(block, ErrorKind::Verify)));
            }
            extensions.push(ext);
            block = rest;
        }
        Ok((input, extensions))
    }

    pub fn serialize_list(extensions: &[Extension], output: &mut Buf) {
        if extensions.is_empty() {
            return;
        }
        let total: usize = extensions.iter().map(|e| 4 + e.data.len()).sum();
        output.extend_from_slice(&(total as u16).to_be_bytes());
        for ext in extensions {
            output.extend_from_slice(&ext.extension_type.as_u16().to_be_bytes());
            output.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
            output.extend_from_slice(&ext.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_groups_list() {
        let ext = Extension::supported_groups(&[NamedGroup::X25519]);
        let mut out = Buf::new();
        Extension::serialize_list(&[ext.clone()], &mut out);
        assert_eq!(&*out, &[0, 8, 0, 10, 0, 4, 0, 2, 0, 29]);

        let (rest, parsed) = Extension::parse_list(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, vec![ext]);
        assert_eq!(parsed[0].groups(), Some(vec![NamedGroup::X25519]));
    }

    #[test]
    fn missing_block_is_empty() {
        let (_, parsed) = Extension::parse_list(&[]).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn duplicate_extension_rejected() {
        let wire = [0, 8, 0, 99, 0, 0, 0, 99, 0, 0];
        assert!(Extension::parse_list(&wire).is_err());
    }
}
