//! Online-mode key exchange: the server's Encryption Request, the shared
//! secret, and the hash the session server expects.

use num_bigint::BigInt;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};

use super::ProtocolError;
use super::codec::{PacketReader, SHARED_SECRET_LEN, write_byte_array};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    /// DER-encoded SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl EncryptionRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = PacketReader::new(body);
        Ok(Self {
            server_id: reader.read_string()?,
            public_key: reader.read_byte_array()?.to_vec(),
            verify_token: reader.read_byte_array()?.to_vec(),
        })
    }

    /// Body of the Encryption Response: shared secret and verify token, each
    /// encrypted with the server's key.
    pub fn respond(&self, shared_secret: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let key = RsaPublicKey::from_public_key_der(&self.public_key)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        let secret = key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, shared_secret)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        let token = key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &self.verify_token)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(secret.len() + token.len() + 6);
        write_byte_array(&mut body, &secret);
        write_byte_array(&mut body, &token);
        Ok(body)
    }

    pub fn server_hash(&self, shared_secret: &[u8]) -> String {
        server_hash(&self.server_id, shared_secret, &self.public_key)
    }
}

pub fn generate_shared_secret() -> [u8; SHARED_SECRET_LEN] {
    let mut secret = [0u8; SHARED_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// SHA-1 over server id, shared secret and public key, printed as a signed
/// (two's complement) hex number without leading zeros.
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key);
    BigInt::from_signed_bytes_be(&hasher.finalize()).to_str_radix(16)
}
