use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use futures::prelude::*;
use libp2p::swarm::StreamProtocol;
use natter_types::constants::MAX_FRAME_SIZE;
use natter_types::network::{Ack, WireMessage};
use std::io;

use crate::error::RelayError;
use crate::protocol::PROTOCOL_VERSION;

/// Request-response codec for the flood protocol: every [`WireMessage`] is
/// answered with an [`Ack`], both framed as
/// `[u32 BE length][version byte][borsh body]` where the length counts the
/// version byte and the body.
#[derive(Debug, Clone, Default)]
pub struct FloodCodec;

#[async_trait]
impl libp2p::request_response::Codec for FloodCodec {
    type Protocol = StreamProtocol;
    type Request = WireMessage;
    type Response = Ack;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_frame(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_frame(io).await
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_frame(io, &res).await
    }
}

/// Read one versioned, length-prefixed frame from an async reader.
async fn read_frame<T, M>(io: &mut T) -> io::Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: BorshDeserialize,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(invalid_data(format!(
            "frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }
    if len < 1 {
        return Err(invalid_data(
            "frame too short: missing protocol version byte".to_string(),
        ));
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&len_buf);
    frame.resize(4 + len, 0);
    io.read_exact(&mut frame[4..]).await?;

    decode_frame(&frame).map_err(|e| invalid_data(e.to_string()))
}

/// Write one versioned, length-prefixed frame to an async writer.
async fn write_frame<T, M>(io: &mut T, msg: &M) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: BorshSerialize,
{
    let frame = encode_frame(msg).map_err(|e| invalid_data(e.to_string()))?;
    io.write_all(&frame).await?;
    io.flush().await
}

fn invalid_data(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

/// Frame a value for the wire.
pub fn encode_frame<M: BorshSerialize>(msg: &M) -> Result<Vec<u8>, RelayError> {
    let data = borsh::to_vec(msg).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;

    if data.len() >= MAX_FRAME_SIZE {
        return Err(RelayError::MessageTooLarge {
            size: 1 + data.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let body_len = 1 + data.len();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Decode a versioned, length-prefixed frame.
pub fn decode_frame<M: BorshDeserialize>(data: &[u8]) -> Result<M, RelayError> {
    if data.len() < 4 {
        return Err(RelayError::CodecError {
            reason: format!("frame of {} bytes has no length prefix", data.len()),
        });
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(RelayError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if len < 1 {
        return Err(RelayError::CodecError {
            reason: "frame too short: missing protocol version byte".to_string(),
        });
    }

    if data.len() < 4 + len {
        return Err(RelayError::CodecError {
            reason: format!(
                "data too short: expected {} bytes, got {}",
                4 + len,
                data.len()
            ),
        });
    }

    let version = data[4];
    if version != PROTOCOL_VERSION {
        return Err(RelayError::VersionMismatch {
            peer: version,
            ours: PROTOCOL_VERSION,
        });
    }

    M::try_from_slice(&data[5..4 + len]).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })
}
