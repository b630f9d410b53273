use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;
use crate::crypto::SecureRandom;

/// The 32 byte hello random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn new(rng: &dyn SecureRandom) -> Result<Self, String> {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes)?;
        Ok(Random(bytes))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(32usize)(input)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok((input, Random(bytes)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.0);
    }
}
