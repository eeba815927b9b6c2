//! AES-CBC, AES-CMAC, SV1/SV2 session-key derivation, and the small set of
//! constant-time/zeroing helpers the secure channel is built on.
//!
//! No AES engine is implemented here — the `aes` crate provides the block
//! cipher; this module only wires it into the modes and derivations
//! NTAG424 EV2 needs.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use cmac::{Cmac, Mac};
use crc::{Crc, CRC_32_JAMCRC};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

fn require_block_multiple(data: &[u8], what: &str) -> Result<()> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::invalid_argument(format!(
            "{what} length {} is not a positive multiple of {BLOCK_SIZE}",
            data.len()
        )));
    }
    Ok(())
}

/// AES-128-CBC encrypt, no padding: `plain.len()` must be a multiple of 16.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plain: &[u8]) -> Result<Vec<u8>> {
    require_block_multiple(plain, "plaintext")?;
    let mut enc = Aes128CbcEnc::new(key.into(), iv.into());
    let mut out = plain.to_vec();
    for chunk in out.chunks_mut(BLOCK_SIZE) {
        let block = aes::cipher::generic_array::GenericArray::from_mut_slice(chunk);
        enc.encrypt_block_mut(block);
    }
    Ok(out)
}

/// AES-128-CBC decrypt, no padding: `cipher.len()` must be a multiple of 16.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], cipher: &[u8]) -> Result<Vec<u8>> {
    require_block_multiple(cipher, "ciphertext")?;
    let mut dec = Aes128CbcDec::new(key.into(), iv.into());
    let mut out = cipher.to_vec();
    for chunk in out.chunks_mut(BLOCK_SIZE) {
        let block = aes::cipher::generic_array::GenericArray::from_mut_slice(chunk);
        dec.decrypt_block_mut(block);
    }
    Ok(out)
}

/// AES-ECB single/multi-block encrypt, used only for IVCmd/IVResp
/// derivation — never for bulk data.
pub fn aes_ecb_encrypt(key: &[u8; 16], plain: &[u8; 16]) -> Result<[u8; 16]> {
    let mut block = *plain;
    let mut enc = Aes128EcbEnc::new(key.into());
    let generic = aes::cipher::generic_array::GenericArray::from_mut_slice(&mut block);
    enc.encrypt_block_mut(generic);
    Ok(block)
}

/// AES-CMAC over arbitrary-length data, truncated to nothing (full 16-byte
/// MAC). Truncation to CMACt lives in `secure_messaging`, which is the only
/// caller that needs it.
pub fn aes_cmac(key: &[u8; 16], data: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Cmac<aes::Aes128> as Mac>::new_from_slice(key)
        .map_err(|e| Error::invalid_argument(format!("cmac key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn build_sv(prefix: (u8, u8), rnd_a: &[u8; 16], rnd_b: &[u8; 16]) -> [u8; 32] {
    let mut sv = [0u8; 32];
    sv[0] = prefix.0;
    sv[1] = prefix.1;
    sv[2] = 0x00;
    sv[3] = 0x01;
    sv[4] = 0x00;
    sv[5] = 0x80;
    sv[6..8].copy_from_slice(&rnd_a[0..2]);
    for i in 0..6 {
        sv[8 + i] = rnd_a[2 + i] ^ rnd_b[i];
    }
    sv[14..24].copy_from_slice(&rnd_b[6..16]);
    sv[24..32].copy_from_slice(&rnd_a[8..16]);
    sv
}

/// SV1: session-encryption-key derivation vector, prefix `(0xA5, 0x5A)`.
pub fn sv1(rnd_a: &[u8; 16], rnd_b: &[u8; 16]) -> [u8; 32] {
    build_sv((0xA5, 0x5A), rnd_a, rnd_b)
}

/// SV2: session-MAC-key derivation vector, prefix `(0x5A, 0xA5)`.
pub fn sv2(rnd_a: &[u8; 16], rnd_b: &[u8; 16]) -> [u8; 32] {
    build_sv((0x5A, 0xA5), rnd_a, rnd_b)
}

/// `derive_session_keys(auth_key, RndA, RndB) -> (enc_key, mac_key)`.
pub fn derive_session_keys(
    auth_key: &[u8; 16],
    rnd_a: &[u8; 16],
    rnd_b: &[u8; 16],
) -> Result<([u8; 16], [u8; 16])> {
    let enc_key = aes_cmac(auth_key, &sv1(rnd_a, rnd_b))?;
    let mac_key = aes_cmac(auth_key, &sv2(rnd_a, rnd_b))?;
    Ok((enc_key, mac_key))
}

/// Byte-rotate a 16-byte buffer left by 1 (`b[0..] = buf[1..] || buf[0]`).
pub fn rotate_left_1(buf: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..15].copy_from_slice(&buf[1..]);
    out[15] = buf[0];
    out
}

/// Constant-time check that `rotate_left_1(rnd_a) == rnd_a_prime`.
pub fn verify_rnd_a_prime(rnd_a: &[u8; 16], rnd_a_prime: &[u8; 16]) -> bool {
    let rotated = rotate_left_1(rnd_a);
    constant_time_eq(&rotated, rnd_a_prime)
}

/// Constant-time equality over equal-length byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// CRC-32/JAMCRC (poly 0x04C11DB7, init 0xFFFFFFFF, reflected, no final
/// XOR), little-endian output. Used only for ChangeKey's CRC32NK over
/// non-auth keys.
pub fn crc32_nk(data: &[u8]) -> [u8; 4] {
    let crc = Crc::<u32>::new(&CRC_32_JAMCRC);
    crc.checksum(data).to_le_bytes()
}

/// Zero a buffer in a way that survives optimization, for any key, nonce,
/// or session-key value that leaves scope.
pub fn secure_zero(buf: &mut [u8]) {
    buf.zeroize();
}
