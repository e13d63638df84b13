//! Client key loading.
//!
//! Besides plain PKCS#8, PKCS#1 and SEC1 keys this accepts the two
//! passphrase-protected forms OpenSSL writes: PKCS#8 `ENCRYPTED PRIVATE KEY`
//! blocks (PBES2 with AES or 3DES) and traditional keys carrying
//! `Proc-Type: 4,ENCRYPTED` and `DEK-Info` headers.

use aes::{Aes128, Aes192, Aes256};
use cbc::{
    Decryptor,
    cipher::{BlockDecryptMut, InvalidLength, KeyIvInit, block_padding::Pkcs7},
};
use des::TdesEde3;
use pem::Pem;
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer};

use crate::error::GatewayError;

const ENCRYPTED_PKCS8_TAG: &str = "ENCRYPTED PRIVATE KEY";
const PKCS8_TAG: &str = "PRIVATE KEY";
const RSA_TAG: &str = "RSA PRIVATE KEY";
const EC_TAG: &str = "EC PRIVATE KEY";
const LEGACY_ENCRYPTED: &str = "4,ENCRYPTED";

/// Picks the private key out of `pem_bytes`, decrypting it with
/// `passphrase` when the block is encrypted.
pub(crate) fn parse_private_key(
    pem_bytes: &[u8],
    passphrase: Option<&str>,
) -> Result<PrivateKeyDer<'static>, GatewayError> {
    let blocks = pem::parse_many(pem_bytes)
        .map_err(|err| GatewayError::Configuration(format!("invalid PEM: {err}")))?;

    for block in &blocks {
        if block.tag() == ENCRYPTED_PKCS8_TAG {
            return decrypt_pkcs8(block, require_passphrase(passphrase)?);
        }
        if block.headers().get("Proc-Type") == Some(LEGACY_ENCRYPTED) {
            return decrypt_legacy(block, require_passphrase(passphrase)?);
        }
    }

    rustls_pemfile::private_key(&mut &pem_bytes[..])
        .map_err(|err| GatewayError::Configuration(format!("invalid private key PEM: {err}")))?
        .ok_or_else(|| GatewayError::Configuration("no private key found".to_string()))
}

fn require_passphrase(passphrase: Option<&str>) -> Result<&str, GatewayError> {
    passphrase.ok_or_else(|| {
        GatewayError::Configuration(
            "private key is encrypted but no passphrase is configured".to_string(),
        )
    })
}

fn decrypt_pkcs8(block: &Pem, passphrase: &str) -> Result<PrivateKeyDer<'static>, GatewayError> {
    let encrypted = EncryptedPrivateKeyInfo::try_from(block.contents())
        .map_err(|err| GatewayError::Configuration(format!("invalid encrypted key: {err}")))?;
    let document = encrypted.decrypt(passphrase).map_err(|err| {
        GatewayError::Configuration(format!("failed to decrypt private key: {err}"))
    })?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}

fn decrypt_legacy(block: &Pem, passphrase: &str) -> Result<PrivateKeyDer<'static>, GatewayError> {
    let dek_info = block.headers().get("DEK-Info").ok_or_else(|| {
        GatewayError::Configuration("encrypted private key has no DEK-Info header".to_string())
    })?;
    let (cipher_name, iv_hex) = dek_info.split_once(',').ok_or_else(|| {
        GatewayError::Configuration(format!("malformed DEK-Info header: {dek_info}"))
    })?;

    let cipher = LegacyCipher::from_name(cipher_name.trim()).ok_or_else(|| {
        GatewayError::Configuration(format!("unsupported private key cipher: {cipher_name}"))
    })?;
    let iv = hex::decode(iv_hex.trim())
        .ok()
        .filter(|iv| iv.len() == cipher.iv_len())
        .ok_or_else(|| GatewayError::Configuration(format!("malformed DEK-Info IV: {iv_hex}")))?;

    let key = derive_legacy_key(passphrase.as_bytes(), &iv[..8], cipher.key_len());
    let mut buf = block.contents().to_vec();
    let der = cipher.decrypt(&key, &iv, &mut buf)?.to_vec();

    match block.tag() {
        RSA_TAG => Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der))),
        EC_TAG => Ok(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der))),
        PKCS8_TAG => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der))),
        other => Err(GatewayError::Configuration(format!(
            "unsupported encrypted key type: {other}"
        ))),
    }
}

/// OpenSSL's `EVP_BytesToKey` with MD5 and one iteration.
fn derive_legacy_key(passphrase: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut previous: Option<md5::Digest> = None;

    while key.len() < key_len {
        let mut context = md5::Context::new();
        if let Some(digest) = previous {
            context.consume(digest.0);
        }
        context.consume(passphrase);
        context.consume(salt);

        let digest = context.compute();
        key.extend_from_slice(&digest.0);
        previous = Some(digest);
    }

    key.truncate(key_len);
    key
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyCipher {
    DesEde3Cbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl LegacyCipher {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "DES-EDE3-CBC" => Some(Self::DesEde3Cbc),
            "AES-128-CBC" => Some(Self::Aes128Cbc),
            "AES-192-CBC" => Some(Self::Aes192Cbc),
            "AES-256-CBC" => Some(Self::Aes256Cbc),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::DesEde3Cbc | Self::Aes192Cbc => 24,
            Self::Aes128Cbc => 16,
            Self::Aes256Cbc => 32,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            Self::DesEde3Cbc => 8,
            _ => 16,
        }
    }

    fn decrypt<'a>(
        self,
        key: &[u8],
        iv: &[u8],
        buf: &'a mut [u8],
    ) -> Result<&'a [u8], GatewayError> {
        let key_error = |err: InvalidLength| {
            GatewayError::Configuration(format!("invalid key derivation: {err}"))
        };

        let unpadded = match self {
            Self::DesEde3Cbc => Decryptor::<TdesEde3>::new_from_slices(key, iv)
                .map_err(key_error)?
                .decrypt_padded_mut::<Pkcs7>(buf),
            Self::Aes128Cbc => Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(key_error)?
                .decrypt_padded_mut::<Pkcs7>(buf),
            Self::Aes192Cbc => Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(key_error)?
                .decrypt_padded_mut::<Pkcs7>(buf),
            Self::Aes256Cbc => Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(key_error)?
                .decrypt_padded_mut::<Pkcs7>(buf),
        };

        unpadded.map_err(|_| {
            GatewayError::Configuration(
                "failed to decrypt private key: wrong passphrase".to_string(),
            )
        })
    }
}
