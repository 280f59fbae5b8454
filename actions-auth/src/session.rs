//! Agent session crypto: RSA-OAEP unwrap of the session key and PKCS#7 (AES-CBC)
//! decryption of message bodies.
use crate::{error::CryptoError, rsa_params::RsaParameters};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::symm::{self, Cipher};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const IV_LEN: usize = 16;

/// Unwraps the session key sent encrypted with the agent public key.
///
/// OAEP uses SHA-1 unless the server asked for FIPS encryption, then SHA-256.
pub fn unwrap_session_key(
    encrypted_key: &[u8],
    params: &RsaParameters,
    use_fips_encryption: bool,
) -> Result<Vec<u8>, CryptoError> {
    let pkey = PKey::from_rsa(params.to_private_key()?)?;
    let digest = oaep_digest(use_fips_encryption);

    let mut decrypter = Decrypter::new(&pkey)?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    decrypter.set_rsa_oaep_md(digest)?;
    decrypter.set_rsa_mgf1_md(digest)?;

    let mut key = vec![0; decrypter.decrypt_len(encrypted_key)?];
    let len = decrypter.decrypt(encrypted_key, &mut key)?;
    key.truncate(len);
    Ok(key)
}

/// Wraps `key` with the public half of `params`. Counterpart of [unwrap_session_key].
pub fn wrap_session_key(
    key: &[u8],
    params: &RsaParameters,
    use_fips_encryption: bool,
) -> Result<Vec<u8>, CryptoError> {
    let pkey = PKey::from_rsa(params.to_public_key()?)?;
    let digest = oaep_digest(use_fips_encryption);

    let mut encrypter = Encrypter::new(&pkey)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(digest)?;
    encrypter.set_rsa_mgf1_md(digest)?;

    let mut wrapped = vec![0; encrypter.encrypt_len(key)?];
    let len = encrypter.encrypt(key, &mut wrapped)?;
    wrapped.truncate(len);
    Ok(wrapped)
}

fn oaep_digest(use_fips_encryption: bool) -> MessageDigest {
    if use_fips_encryption {
        MessageDigest::sha256()
    } else {
        MessageDigest::sha1()
    }
}

/// Decrypts a PKCS#7 EncryptedData content: AES-CBC with PKCS#7 padding, the cipher
/// size being picked from the key length (16 bytes for the session keys in use).
pub fn decrypt_pkcs7(ciphertext: &[u8], iv: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cbc_cipher(key)?;
    check_iv(iv)?;
    Ok(symm::decrypt(cipher, key, Some(iv), ciphertext)?)
}

pub fn encrypt_pkcs7(plaintext: &[u8], iv: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cbc_cipher(key)?;
    check_iv(iv)?;
    Ok(symm::encrypt(cipher, key, Some(iv), plaintext)?)
}

/// Decodes and decrypts a message body, dropping the UTF-8 byte order mark the
/// service prefixes its payloads with.
pub fn decrypt_message_body(body: &str, iv: &str, key: &[u8]) -> Result<String, CryptoError> {
    let ciphertext = STANDARD.decode(body.trim())?;
    let iv = STANDARD.decode(iv.trim())?;
    let plaintext = decrypt_pkcs7(&ciphertext, &iv, key)?;
    Ok(String::from_utf8(strip_bom(&plaintext).to_vec())?)
}

pub fn strip_bom(payload: &[u8]) -> &[u8] {
    payload.strip_prefix(UTF8_BOM).unwrap_or(payload)
}

fn cbc_cipher(key: &[u8]) -> Result<Cipher, CryptoError> {
    match key.len() {
        16 => Ok(Cipher::aes_128_cbc()),
        24 => Ok(Cipher::aes_192_cbc()),
        32 => Ok(Cipher::aes_256_cbc()),
        actual => Err(CryptoError::InvalidLength {
            name: "key",
            expected: 16,
            actual,
        }),
    }
}

fn check_iv(iv: &[u8]) -> Result<(), CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidLength {
            name: "iv",
            expected: IV_LEN,
            actual: iv.len(),
        });
    }
    Ok(())
}
