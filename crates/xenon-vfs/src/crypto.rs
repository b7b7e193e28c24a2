//! Archive header/TOC decryption. Observed encrypted archives run the
//! ciphertext through AES-256 in ECB mode 16 times with the same key
//! before the plaintext header falls out; this is an empirical match, not
//! a documented scheme, so any archive whose magic still fails to match
//! after 16 passes is reported as a decryption failure rather than
//! retried with a different pass count.

use aes::Aes256;
use cipher::{block_padding::NoPadding, BlockDecryptMut, KeyInit};
use xenon_core::{Error, Result};

pub const AES_KEY_LEN: usize = 32;
const DECRYPTION_PASSES: usize = 16;

type EcbDecryptor = ecb::Decryptor<Aes256>;

/// Decrypts `data` in place. `data.len()` must be a multiple of the AES
/// block size (16 bytes); archive headers and TOCs are always padded to
/// this by their producers.
pub fn decrypt_16_pass(key: &[u8; AES_KEY_LEN], data: &mut [u8]) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(Error::DecryptionError {
            reason: format!("buffer length {} is not a multiple of the AES block size", data.len()),
        });
    }
    for _ in 0..DECRYPTION_PASSES {
        let cipher = EcbDecryptor::new_from_slice(key)
            .map_err(|_| Error::DecryptionError { reason: "invalid AES-256 key length".into() })?;
        cipher
            .decrypt_padded_mut::<NoPadding>(data)
            .map_err(|_| Error::DecryptionError { reason: "AES-256-ECB decryption failed".into() })?;
    }
    Ok(())
}

/// Loads a 32-byte key from a file, rejecting any other length rather
/// than silently truncating or zero-padding it.
pub fn load_key(path: &std::path::Path) -> Result<[u8; AES_KEY_LEN]> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::DecryptionError { reason: format!("reading key file {}: {e}", path.display()) })?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| Error::DecryptionError { reason: format!("key file is {} bytes, expected {AES_KEY_LEN}", bytes.len()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher::BlockEncryptMut;

    fn encrypt_16_pass(key: &[u8; AES_KEY_LEN], data: &mut [u8]) {
        type EcbEncryptor = ecb::Encryptor<Aes256>;
        for _ in 0..DECRYPTION_PASSES {
            let cipher = EcbEncryptor::new_from_slice(key).unwrap();
            cipher.encrypt_padded_mut::<NoPadding>(data, data.len()).unwrap();
        }
    }

    #[test]
    fn sixteen_pass_round_trip_recovers_plaintext() {
        let key = [0x5Au8; AES_KEY_LEN];
        let original = *b"ARCHIVE_HEADER!!";
        let mut buf = original;
        encrypt_16_pass(&key, &mut buf);
        assert_ne!(buf, original);
        decrypt_16_pass(&key, &mut buf).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn rejects_buffer_not_a_multiple_of_block_size() {
        let key = [0u8; AES_KEY_LEN];
        let mut buf = [0u8; 15];
        assert!(decrypt_16_pass(&key, &mut buf).is_err());
    }
}
