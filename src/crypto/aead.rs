//! Record protection framing for AEAD records.
//!
//! A protected record carries an 8 byte explicit nonce in front of the
//! ciphertext and the tag behind it: 16 bytes for GCM, 8 for CCM_8.

use std::ops::Deref;

use crate::types::{ContentType, Sequence};

/// Explicit nonce length transmitted with each record.
pub(crate) const EXPLICIT_NONCE_LEN: usize = 8;

/// Fixed IV portion derived from the key block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Iv(pub [u8; 4]);

impl Iv {
    pub(crate) fn new(iv: &[u8]) -> Option<Self> {
        iv.try_into().ok().map(Iv)
    }
}

/// Full AEAD nonce (fixed IV + explicit nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 12]);

impl Nonce {
    pub(crate) fn new(iv: Iv, explicit_nonce: &[u8; EXPLICIT_NONCE_LEN]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit_nonce);
        Self(nonce)
    }
}

impl Deref for Nonce {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Additional authenticated data of a record.
///
/// `epoch ‖ seq48 ‖ content type ‖ version ‖ plaintext length`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aad(pub [u8; 13]);

impl Aad {
    pub(crate) fn new(content_type: ContentType, sequence: Sequence, length: u16) -> Self {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&sequence.to_explicit());
        aad[8] = content_type.as_u8();
        aad[9] = 0xfe;
        aad[10] = 0xfd;
        aad[11..].copy_from_slice(&length.to_be_bytes());
        Aad(aad)
    }
}

impl Deref for Aad {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_layout() {
        let aad = Aad::new(ContentType::ApplicationData, Sequence::new(1, 0x0203), 0x0405);
        assert_eq!(
            &*aad,
            &[0, 1, 0, 0, 0, 0, 2, 3, 23, 0xfe, 0xfd, 4, 5][..]
        );
    }

    #[test]
    fn nonce_is_iv_then_explicit() {
        let iv = Iv::new(&[9, 9, 9, 9]).unwrap();
        let nonce = Nonce::new(iv, &Sequence::new(1, 7).to_explicit());
        assert_eq!(nonce.0, [9, 9, 9, 9, 0, 1, 0, 0, 0, 0, 0, 7]);
        assert!(Iv::new(&[1, 2, 3]).is_none());
    }
}
