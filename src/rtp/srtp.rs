//! SRTP packet protection (RFC 3711)
//!
//! AES-CM encryption with HMAC-SHA1 authentication and a 10-byte tag,
//! plus roll-over-counter carriage in the authentication tag (RFC 4771
//! mode 1) so receivers can join a stream mid-flight. One session
//! protects one direction of one RTP stream.

use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use byteorder::{BigEndian, ByteOrder};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::SrtpError;

use super::packet::RTP_HEADER_LEN;

type AesCm = Ctr128BE<Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// Master key length in bytes (32 hex digits)
pub const MASTER_KEY_LEN: usize = 16;
/// Master salt length in bytes (28 hex digits)
pub const MASTER_SALT_LEN: usize = 14;
/// Authentication tag length appended to every packet
pub const TAG_LEN: usize = 10;

/// Key derivation labels, RFC 3711 §4.3.1
const LABEL_RTP_ENCRYPTION: u8 = 0x00;
const LABEL_RTP_AUTH: u8 = 0x01;
const LABEL_RTP_SALT: u8 = 0x02;

/// One SRTP crypto context
pub struct SrtpSession {
    cipher_key: [u8; 16],
    auth_key: [u8; 20],
    session_salt: [u8; MASTER_SALT_LEN],
    /// Roll-over counter, incremented on sequence wrap
    roc: u32,
    last_seq: Option<u16>,
    /// Every `rcc_rate`-th sequence number carries the ROC in its tag
    rcc_rate: u16,
}

impl SrtpSession {
    /// Create a session from hex-encoded master key and salt
    ///
    /// # Errors
    ///
    /// Returns `InvalidHex` for non-hex input and `BadKeyLength` /
    /// `BadSaltLength` when the decoded sizes are not 16 and 14 bytes.
    pub fn new(key_hex: &str, salt_hex: &str) -> Result<Self, SrtpError> {
        let master_key = decode_hex(key_hex)?;
        let master_salt = decode_hex(salt_hex)?;
        if master_key.len() != MASTER_KEY_LEN {
            return Err(SrtpError::BadKeyLength {
                expected: MASTER_KEY_LEN,
                actual: master_key.len(),
            });
        }
        if master_salt.len() != MASTER_SALT_LEN {
            return Err(SrtpError::BadSaltLength {
                expected: MASTER_SALT_LEN,
                actual: master_salt.len(),
            });
        }

        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(&master_key);
        let mut salt = [0u8; MASTER_SALT_LEN];
        salt.copy_from_slice(&master_salt);

        let mut cipher_key = [0u8; 16];
        derive(&key, &salt, LABEL_RTP_ENCRYPTION, &mut cipher_key);
        let mut auth_key = [0u8; 20];
        derive(&key, &salt, LABEL_RTP_AUTH, &mut auth_key);
        let mut session_salt = [0u8; MASTER_SALT_LEN];
        derive(&key, &salt, LABEL_RTP_SALT, &mut session_salt);

        Ok(Self {
            cipher_key,
            auth_key,
            session_salt,
            roc: 0,
            last_seq: None,
            rcc_rate: 1,
        })
    }

    /// Encrypt and authenticate one RTP packet in place
    ///
    /// The payload is encrypted, the tag appended. Tag layout follows
    /// roll-over-counter carriage: on carrying packets the first 4 tag
    /// bytes are the ROC and the MAC is truncated to 6 bytes.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` for packets shorter than an RTP header.
    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(SrtpError::Truncated { length: packet.len() });
        }
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);
        self.advance_roc(seq);
        let roc = self.roc;

        self.apply_cipher(packet, ssrc, roc, seq);
        let tag = self.compute_tag_with(packet, roc, seq);
        packet.extend_from_slice(&tag);
        Ok(())
    }

    /// Verify and decrypt one protected packet in place
    ///
    /// # Errors
    ///
    /// Returns `Truncated` for packets too short to carry a header and
    /// tag, and `AuthenticationFailed` on any tag mismatch. Nothing is
    /// decrypted unless the tag verifies.
    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < RTP_HEADER_LEN + TAG_LEN {
            return Err(SrtpError::Truncated { length: packet.len() });
        }
        let body_len = packet.len() - TAG_LEN;
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);

        let roc = if self.carries_roc(seq) {
            BigEndian::read_u32(&packet[body_len..body_len + 4])
        } else {
            self.estimated_roc(seq)
        };

        let (body, tag) = packet.split_at(body_len);
        if self.compute_tag_with(body, roc, seq) != tag {
            return Err(SrtpError::AuthenticationFailed);
        }

        packet.truncate(body_len);
        self.apply_cipher(packet, ssrc, roc, seq);
        self.roc = roc;
        self.last_seq = Some(seq);
        Ok(())
    }

    fn carries_roc(&self, seq: u16) -> bool {
        seq % self.rcc_rate == 0
    }

    fn advance_roc(&mut self, seq: u16) {
        if let Some(last) = self.last_seq
            && seq < last
            && last - seq > u16::MAX / 2
        {
            self.roc = self.roc.wrapping_add(1);
        }
        self.last_seq = Some(seq);
    }

    fn estimated_roc(&self, seq: u16) -> u32 {
        match self.last_seq {
            Some(last) if seq < last && last - seq > u16::MAX / 2 => self.roc.wrapping_add(1),
            _ => self.roc,
        }
    }

    /// AES-CM over the payload; the header stays in the clear
    fn apply_cipher(&self, packet: &mut [u8], ssrc: u32, roc: u32, seq: u16) {
        // IV = (salt << 16) XOR (ssrc << 64) XOR (index << 16)
        let mut iv = [0u8; 16];
        iv[..MASTER_SALT_LEN].copy_from_slice(&self.session_salt);
        let mut ssrc_bytes = [0u8; 4];
        BigEndian::write_u32(&mut ssrc_bytes, ssrc);
        for (i, b) in ssrc_bytes.iter().enumerate() {
            iv[4 + i] ^= b;
        }
        let index = (u64::from(roc) << 16) | u64::from(seq);
        let mut index_bytes = [0u8; 6];
        BigEndian::write_u48(&mut index_bytes, index);
        for (i, b) in index_bytes.iter().enumerate() {
            iv[8 + i] ^= b;
        }

        let mut cipher = AesCm::new(&self.cipher_key.into(), &iv.into());
        cipher.apply_keystream(&mut packet[RTP_HEADER_LEN..]);
    }

    /// HMAC-SHA1 over packet || ROC, truncated into the tag layout
    fn compute_tag_with(&self, body: &[u8], roc: u32, seq: u16) -> [u8; TAG_LEN] {
        let mut roc_bytes = [0u8; 4];
        BigEndian::write_u32(&mut roc_bytes, roc);
        let mac = hmac_sha1(&self.auth_key, &[body, &roc_bytes]);

        let mut tag = [0u8; TAG_LEN];
        if self.carries_roc(seq) {
            tag[..4].copy_from_slice(&roc_bytes);
            tag[4..].copy_from_slice(&mac[..TAG_LEN - 4]);
        } else {
            tag.copy_from_slice(&mac[..TAG_LEN]);
        }
        tag
    }
}

/// RFC 3711 §4.3.1 key derivation with a zero key-derivation rate
fn derive(master_key: &[u8; 16], master_salt: &[u8; MASTER_SALT_LEN], label: u8, out: &mut [u8]) {
    let mut x = *master_salt;
    x[7] ^= label;

    let mut iv = [0u8; 16];
    iv[..MASTER_SALT_LEN].copy_from_slice(&x);

    out.fill(0);
    let mut cipher = AesCm::new(master_key.into(), &iv.into());
    cipher.apply_keystream(out);
}

fn hmac_sha1(key: &[u8; 20], parts: &[&[u8]]) -> [u8; 20] {
    // HMAC accepts any key length; 20 bytes never fails
    let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
        debug_assert!(false, "hmac key rejected");
        return [0u8; 20];
    };
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, SrtpError> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(SrtpError::InvalidHex);
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = hex_digit(pair[0]).ok_or(SrtpError::InvalidHex)?;
        let lo = hex_digit(pair[1]).ok_or(SrtpError::InvalidHex)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
