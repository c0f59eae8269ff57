//! Hash-based key derivation
//!
//! A MAC built directly on the 64-byte hash primitive, an HKDF-style
//! single-round expansion on top of it, and the two Double Ratchet helpers
//! (`kdf_rk`, `kdf_ck`). All functions are pure.

use sha2::{Digest, Sha512};

use crate::crypto::errors::{CryptoError, CryptoResult};

/// Native output size of [`hash`]
pub const HASH_LEN: usize = 64;

/// Default `info` for [`expand`]: the protocol/application identifier
pub const APP_ID: &[u8] = b"SC4-V0.1";

/// Default output length of [`expand`]
pub const DEFAULT_OUTPUT_LEN: usize = 32;

const INNER_PAD: u8 = 0x36;
const OUTER_PAD: u8 = 0x5C;

/// The protocol hash (SHA-512)
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

fn xor_pad(key: &[u8; HASH_LEN], pad: u8) -> [u8; HASH_LEN] {
    let mut out = *key;
    out.iter_mut().for_each(|b| *b ^= pad);
    out
}

/// `hash(okp ‖ hash(ikp ‖ msg))` with the pads derived from `hash(key)`
pub fn mac(key: &[u8], msg: &[u8]) -> [u8; HASH_LEN] {
    let k1 = hash(key);
    let ikp = xor_pad(&k1, INNER_PAD);
    let okp = xor_pad(&k1, OUTER_PAD);

    let mut inner = Sha512::new();
    inner.update(ikp);
    inner.update(msg);
    let inner = inner.finalize();

    let mut outer = Sha512::new();
    outer.update(okp);
    outer.update(inner);

    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&outer.finalize());
    out
}

/// Single-round expansion: `mac(mac(salt, ikm), info ‖ 0x00)[..out_len]`
///
/// Only one block is produced, so `out_len` may not exceed [`HASH_LEN`].
pub fn expand(ikm: &[u8], out_len: usize, salt: &[u8], info: &[u8]) -> CryptoResult<Vec<u8>> {
    if out_len > HASH_LEN {
        return Err(CryptoError::KdfOutputTooLong(out_len));
    }
    let prk = mac(salt, ikm);
    let mut info_block = Vec::with_capacity(info.len() + 1);
    info_block.extend_from_slice(info);
    info_block.push(0);
    let okm = mac(&prk, &info_block);
    Ok(okm[..out_len].to_vec())
}

/// [`expand`] with empty salt, the default info and a 32-byte output
pub fn expand_default(ikm: &[u8]) -> [u8; 32] {
    split64(&expand64(ikm, &[])).0
}

fn split64(bytes: &[u8; HASH_LEN]) -> ([u8; 32], [u8; 32]) {
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&bytes[..32]);
    right.copy_from_slice(&bytes[32..]);
    (left, right)
}

fn expand64(ikm: &[u8], salt: &[u8]) -> [u8; HASH_LEN] {
    let prk = mac(salt, ikm);
    mac(&prk, &[APP_ID, &[0u8][..]].concat())
}

/// Root-key step: returns (new root key, new chain key)
pub fn kdf_rk(root_key: &[u8], dh_output: &[u8]) -> ([u8; 32], [u8; 32]) {
    split64(&expand64(root_key, dh_output))
}

/// Chain-key step: returns (new chain key, message key)
pub fn kdf_ck(chain_key: &[u8]) -> ([u8; 32], [u8; 32]) {
    kdf_rk(&[], chain_key)
}
