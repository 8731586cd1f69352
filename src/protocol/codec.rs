//! Wire primitives for the game protocol: VarInts, length-prefixed strings and
//! packet framing with zlib compression and AES-128-CFB8 stream encryption.

use std::io::{Read, Write};

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProtocolError;

const MAX_VARINT_BYTES: usize = 5;

/// The vanilla server never sends frames larger than 2^21 - 1 bytes.
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// Length of the AES key negotiated during an online-mode login.
pub const SHARED_SECRET_LEN: usize = 16;

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Append a VarInt (LEB128 over the two's-complement `u32`) to `buf`.
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

/// Append a VarInt-length-prefixed UTF-8 string to `buf`.
pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Append a VarInt-length-prefixed byte array to `buf`.
pub fn write_byte_array(buf: &mut Vec<u8>, value: &[u8]) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value);
}

/// Cursor over the body of a received packet.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(ProtocolError::Malformed("unexpected end of packet"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ProtocolError::Malformed("unexpected end of packet"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_varint(&mut self) -> Result<i32, ProtocolError> {
        let mut result: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(ProtocolError::Malformed("VarInt longer than 5 bytes"))
    }

    fn read_length(&mut self) -> Result<usize, ProtocolError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(ProtocolError::Malformed("negative length prefix"));
        }
        Ok(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::Malformed("string is not valid UTF-8"))
    }

    pub fn read_byte_array(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_length()?;
        self.read_bytes(len)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub body: Vec<u8>,
}

/// Both directions of an AES-128-CFB8 session. Key and IV are the shared secret.
struct StreamCipher {
    encryptor: Aes128Cfb8Enc,
    decryptor: Aes128Cfb8Dec,
}

impl StreamCipher {
    fn new(shared_secret: &[u8; SHARED_SECRET_LEN]) -> Self {
        let key = GenericArray::from(*shared_secret);
        Self {
            encryptor: Aes128Cfb8Enc::new(&key, &key),
            decryptor: Aes128Cfb8Dec::new(&key, &key),
        }
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.encryptor
                .encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.decryptor
                .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8], data_len: i32) -> Result<Vec<u8>, ProtocolError> {
    if data_len < 0 || data_len as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::Malformed("declared packet length out of range"));
    }
    let mut packet = Vec::with_capacity(data_len as usize);
    ZlibDecoder::new(data)
        .take(data_len as u64 + 1)
        .read_to_end(&mut packet)
        .map_err(|_| ProtocolError::Malformed("corrupt zlib payload"))?;
    if packet.len() != data_len as usize {
        return Err(ProtocolError::Malformed("inflated length does not match header"));
    }
    Ok(packet)
}

/// Framed packet stream over any async byte stream.
pub struct PacketStream<S> {
    stream: S,
    compression_threshold: Option<i32>,
    cipher: Option<StreamCipher>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            compression_threshold: None,
            cipher: None,
        }
    }

    /// A negative threshold disables compression again.
    pub fn set_compression(&mut self, threshold: i32) {
        self.compression_threshold = (threshold >= 0).then_some(threshold);
    }

    pub fn compression_threshold(&self) -> Option<i32> {
        self.compression_threshold
    }

    /// Every byte after this call is encrypted in both directions.
    pub fn enable_encryption(&mut self, shared_secret: &[u8; SHARED_SECRET_LEN]) {
        self.cipher = Some(StreamCipher::new(shared_secret));
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub async fn send(&mut self, packet_id: i32, body: &[u8]) -> Result<(), ProtocolError> {
        let mut packet = Vec::with_capacity(body.len() + MAX_VARINT_BYTES);
        write_varint(&mut packet, packet_id);
        packet.extend_from_slice(body);

        let payload = match self.compression_threshold {
            Some(threshold) if packet.len() >= threshold as usize => {
                let mut payload = Vec::with_capacity(packet.len());
                write_varint(&mut payload, packet.len() as i32);
                payload.extend(deflate(&packet)?);
                payload
            }
            Some(_) => {
                let mut payload = Vec::with_capacity(packet.len() + 1);
                write_varint(&mut payload, 0);
                payload.extend(packet);
                payload
            }
            None => packet,
        };

        let mut frame = Vec::with_capacity(payload.len() + MAX_VARINT_BYTES);
        write_varint(&mut frame, payload.len() as i32);
        frame.extend_from_slice(&payload);
        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt(&mut frame);
        }

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        self.stream.read_exact(buf).await?;
        if let Some(cipher) = &mut self.cipher {
            cipher.decrypt(buf);
        }
        Ok(())
    }

    async fn read_frame_len(&mut self) -> Result<i32, ProtocolError> {
        let mut result: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let mut byte = [0u8; 1];
            self.read_raw(&mut byte).await?;
            result |= ((byte[0] & 0x7F) as u32) << (7 * i);
            if byte[0] & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(ProtocolError::Malformed("VarInt longer than 5 bytes"))
    }

    pub async fn receive(&mut self) -> Result<Packet, ProtocolError> {
        let len = self.read_frame_len().await?;
        if len <= 0 || len as usize > MAX_FRAME_LEN {
            return Err(ProtocolError::Malformed("frame length out of range"));
        }

        let mut frame = vec![0u8; len as usize];
        self.read_raw(&mut frame).await?;

        let packet = match self.compression_threshold {
            Some(_) => {
                let mut reader = PacketReader::new(&frame);
                match reader.read_varint()? {
                    0 => reader.remaining().to_vec(),
                    data_len => inflate(reader.remaining(), data_len)?,
                }
            }
            None => frame,
        };

        let mut reader = PacketReader::new(&packet);
        let id = reader.read_varint()?;
        Ok(Packet {
            id,
            body: reader.remaining().to_vec(),
        })
    }
}
