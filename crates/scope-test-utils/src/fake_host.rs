//! A scriptable scope host speaking both STP dialects over a real socket.

use bytes::BytesMut;
use std::net::SocketAddr;
use stp_wire::stp1::{STP1_TOKEN, Stp1Codec};
use stp_wire::{Stp1Message, client_id_field, stp0, stp1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

type Error = Box<dyn std::error::Error + Send + Sync>;

/// One end of a proxy's scope socket, driven from a test.
pub struct FakeHost {
    stream: TcpStream,
    buf: BytesMut,
    stp0: stp0::Stp0Reader,
    stp1: Stp1Codec,
}

impl FakeHost {
    pub async fn connect(addr: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        Ok(FakeHost {
            stream,
            buf: BytesMut::with_capacity(4096),
            stp0: stp0::Stp0Reader::new(),
            stp1: Stp1Codec::new(),
        })
    }

    // -- sending ----------------------------------------------------------

    /// Announce the service catalog: `*services <comma-separated names>`.
    pub async fn send_services(&mut self, names: &str) -> Result<(), Error> {
        self.send_stp0(&format!("*services {names}")).await
    }

    /// Send one STP/0 frame with the given payload text.
    pub async fn send_stp0(&mut self, msg: &str) -> Result<(), Error> {
        self.stream.write_all(&stp0::encode_frame(msg)).await?;
        Ok(())
    }

    /// Send the `STP/1\n` sentinel, switching the session to STP/1.
    pub async fn announce_stp1(&mut self) -> Result<(), Error> {
        self.stream.write_all(STP1_TOKEN).await?;
        Ok(())
    }

    /// Send one STP/1 frame carrying `client_id` as the identity field.
    pub async fn send_stp1(&mut self, msg: &Stp1Message, client_id: u32) -> Result<(), Error> {
        let frame = stp1::encode_frame(msg, Some(&client_id_field(client_id)));
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    // -- receiving --------------------------------------------------------

    /// Read the next STP/0 frame the proxy wrote to the host.
    pub async fn recv_stp0(&mut self) -> Result<(String, String), Error> {
        loop {
            if let Some(frame) = self.stp0.next_frame()? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err("proxy closed the scope socket".into());
            }
            self.stp0.feed(&chunk[..n]);
        }
    }

    /// Read the next STP/1 frame the proxy wrote to the host.
    pub async fn recv_stp1(&mut self) -> Result<Stp1Message, Error> {
        loop {
            if let Some(msg) = self.stp1.decode(&mut self.buf)? {
                return Ok(msg);
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err("proxy closed the scope socket".into());
            }
        }
    }
}
