//! Diffie-Hellman key exchange and the AES-128-ECB encrypted envelope
//! (§4.5, §9: "AES-ECB 'no-padding' usage ... encrypts a fully prepared
//! fixed-size block that includes an inner CRC and a random pad").

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::Rng;

use crate::error::{Error, Result};
use crate::ssp::frame::crc16_ssp;

/// Host side of the Diffie-Hellman handshake (§4.5 steps 1-4).
pub struct KeyExchange {
    pub generator: u64,
    pub modulus: u64,
    pub host_secret: u64,
    pub host_inter: u64,
}

impl KeyExchange {
    /// Picks a 16-bit prime generator/modulus pair (`g > m`) and a host
    /// secret `x` in `[1, 2^31)`, per §4.5 step 1-2.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let modulus = random_16_bit_prime(&mut rng);
        let generator = loop {
            let candidate = random_16_bit_prime(&mut rng);
            if candidate > modulus {
                break candidate;
            }
        };
        let host_secret: u64 = rng.gen_range(1..(1u64 << 31));
        let host_inter = mod_pow(generator, host_secret, modulus);

        Self {
            generator,
            modulus,
            host_secret,
            host_inter,
        }
    }

    /// Combine the device's `slave_inter` with the host secret to derive the
    /// shared 64-bit key material (§4.5 step 5).
    pub fn shared_key(&self, slave_inter: u64) -> u64 {
        mod_pow(slave_inter, self.host_secret, self.modulus)
    }
}

/// `g^x mod m` via repeated squaring, all arithmetic in `u128` to avoid
/// overflow on the intermediate products.
fn mod_pow(base: u64, exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result: u128 = 1;
    let mut base = base as u128 % modulus as u128;
    let mut exp = exp;
    let modulus = modulus as u128;

    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base) % modulus;
        }
        exp >>= 1;
        base = (base * base) % modulus;
    }
    result as u64
}

fn random_16_bit_prime(rng: &mut impl Rng) -> u64 {
    loop {
        let candidate = rng.gen_range(1_000u64..=65_535u64);
        if is_prime(candidate) {
            return candidate;
        }
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3u64;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

/// Derives the final 16-byte AES key: `reverse(fixedKey) || LE(K_short)`.
pub fn derive_aes_key(fixed_key_hex: &str, shared_key: u64) -> Result<[u8; 16]> {
    let fixed = hex_decode_8(fixed_key_hex)?;
    let mut key = [0u8; 16];
    for (i, &b) in fixed.iter().rev().enumerate() {
        key[i] = b;
    }
    key[8..16].copy_from_slice(&shared_key.to_le_bytes());
    Ok(key)
}

fn hex_decode_8(hex: &str) -> Result<[u8; 8]> {
    if hex.len() != 16 {
        return Err(Error::protocol("fixed key must be 16 hex characters (8 bytes)"));
    }
    let mut out = [0u8; 8];
    for i in 0..8 {
        out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| Error::protocol("fixed key is not valid hex"))?;
    }
    Ok(out)
}

/// Build the plaintext envelope block `elen || ecount_le || cmd || args ||
/// random_pad || crc16`, zero-padded to a multiple of 16 bytes, then
/// encrypt it in-place with AES-128-ECB.
pub fn encrypt_envelope(key: &[u8; 16], ecount: u32, cmd: u8, args: &[u8]) -> Vec<u8> {
    let elen = 1 + args.len();
    let mut inner = Vec::with_capacity(elen + 7);
    inner.push(elen as u8);
    inner.extend_from_slice(&ecount.to_le_bytes());
    inner.push(cmd);
    inner.extend_from_slice(args);

    let unpadded_len = inner.len() + 2; // + crc16
    let block_len = ((unpadded_len + 15) / 16) * 16;
    let pad_len = block_len - unpadded_len;

    let mut rng = rand::thread_rng();
    let pad: Vec<u8> = (0..pad_len).map(|_| rng.gen()).collect();
    inner.extend_from_slice(&pad);

    let crc = crc16_ssp(&inner);
    inner.extend_from_slice(&crc.to_le_bytes());

    debug_assert_eq!(inner.len() % 16, 0);

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in inner.chunks_mut(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.encrypt_block(&mut ga);
        block.copy_from_slice(ga.as_slice());
    }

    inner
}

/// Decrypt and validate an encrypted reply envelope, returning `(ecount,
/// cmd_or_result, args)`. A CRC or length mismatch is a framing error; an
/// `ecount` that doesn't match `expected_ecount` is a protocol error (§4.5).
pub fn decrypt_envelope(key: &[u8; 16], ciphertext: &[u8], expected_ecount: u32) -> Result<(u32, u8, Vec<u8>)> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(Error::framing("encrypted SSP envelope is not 16-byte aligned"));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut plain = ciphertext.to_vec();
    for block in plain.chunks_mut(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut ga);
        block.copy_from_slice(ga.as_slice());
    }

    if plain.len() < 8 {
        return Err(Error::framing("decrypted SSP envelope too short"));
    }

    let elen = plain[0] as usize;
    let ecount = u32::from_le_bytes([plain[1], plain[2], plain[3], plain[4]]);
    let cmd = plain[5];
    let args_len = elen.checked_sub(1).ok_or_else(|| Error::framing("bad elen in SSP envelope"))?;

    if plain.len() < 6 + args_len + 2 {
        return Err(Error::framing("SSP envelope shorter than elen implies"));
    }
    let args = plain[6..6 + args_len].to_vec();

    let crc_covered = &plain[..plain.len() - 2];
    let crc_received = u16::from_le_bytes([plain[plain.len() - 2], plain[plain.len() - 1]]);
    if crc16_ssp(crc_covered) != crc_received {
        return Err(Error::checksum("inner SSP envelope CRC mismatch"));
    }

    if ecount != expected_ecount {
        return Err(Error::protocol(format!(
            "SSP encryption counter mismatch: expected {expected_ecount}, got {ecount}"
        )));
    }

    Ok((ecount, cmd, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_pow_matches_hand_computation() {
        assert_eq!(mod_pow(2, 10, 1000), 24);
    }

    #[test]
    fn key_exchange_literal_vector() {
        // g=65521, m=65519, x=12345; hostInter = g^x mod m.
        let host_inter = mod_pow(65521, 12345, 65519);
        let slave_inter = 11111u64;
        let k_short = mod_pow(slave_inter, 12345, 65519);

        let key = derive_aes_key("0123456701234567", k_short).unwrap();
        let fixed_reversed: Vec<u8> = hex_decode_8("0123456701234567").unwrap().into_iter().rev().collect();
        assert_eq!(&key[..8], fixed_reversed.as_slice());
        assert_eq!(&key[8..], &k_short.to_le_bytes());
        assert_ne!(host_inter, 0);
    }

    #[test]
    fn envelope_round_trips_through_encrypt_decrypt() {
        let key = [0x42u8; 16];
        let encrypted = encrypt_envelope(&key, 7, 0x07, &[0xaa, 0xbb]);
        let (ecount, cmd, args) = decrypt_envelope(&key, &encrypted, 7).unwrap();
        assert_eq!(ecount, 7);
        assert_eq!(cmd, 0x07);
        assert_eq!(args, vec![0xaa, 0xbb]);
    }

    #[test]
    fn ecount_mismatch_is_rejected() {
        let key = [0x11u8; 16];
        let encrypted = encrypt_envelope(&key, 3, 0x07, &[]);
        assert!(decrypt_envelope(&key, &encrypted, 4).is_err());
    }
}
