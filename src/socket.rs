//! # Summary
//!
//! This module abstracts over connections between processes.
//!
//! Currently uses `tokio-serde` to wrap around `tokio-util`'s
//! length-delimited codec, which in turn wraps around `tokio`'s
//! asynchronous TCP stream. This allows us to serialize and deserialize
//! Rust structs through a TCP connection with minimal boilerplate on the
//! sending and receiving ends; messages are self-delimited, and `String`
//! payloads survive with interior whitespace intact.

use futures::{SinkExt, StreamExt};
use tokio::net;
use tokio_serde::formats::SymmetricalBincode;
use tokio_serde::SymmetricallyFramed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

type ReadTcp = FramedRead<net::tcp::OwnedReadHalf, LengthDelimitedCodec>;
type WriteTcp = FramedWrite<net::tcp::OwnedWriteHalf, LengthDelimitedCodec>;

/// Receiving half of a connection. Expects length-delimited,
/// bincode-encoded data of type `R`.
pub struct Rx<R> {
    inner: SymmetricallyFramed<ReadTcp, R, SymmetricalBincode<R>>,
    dropped: u64,
}

/// Transmitting half of a connection. Sends length-delimited,
/// bincode-encoded data of type `T`.
pub struct Tx<T>(SymmetricallyFramed<WriteTcp, T, SymmetricalBincode<T>>);

/// Split a `tokio::net::TcpStream` into a pair of receiving and
/// transmitting channels capable of reading and writing bincode-encoded
/// data.
pub fn split<R, T>(stream: net::TcpStream) -> (Rx<R>, Tx<T>)
where R: serde::de::DeserializeOwned,
      T: serde::Serialize,
{
    let (rx, tx) = stream.into_split();
    let rx = FramedRead::new(rx, LengthDelimitedCodec::new());
    let tx = FramedWrite::new(tx, LengthDelimitedCodec::new());
    (
        Rx {
            inner: SymmetricallyFramed::new(rx, SymmetricalBincode::default()),
            dropped: 0,
        },
        Tx(SymmetricallyFramed::new(tx, SymmetricalBincode::default())),
    )
}

impl<R: serde::de::DeserializeOwned + Unpin> Rx<R> {
    /// Next decoded message, or `None` once the connection has closed.
    /// Frames that fail to decode are dropped silently, with a counter.
    pub async fn recv(&mut self) -> Option<R> {
        loop {
            match self.inner.next().await {
            | Some(Ok(message)) => return Some(message),
            | Some(Err(error)) => {
                self.dropped += 1;
                trace!("dropped malformed frame ({} so far): {}", self.dropped, error);
            }
            | None => return None,
            }
        }
    }
}

impl<T: serde::Serialize + Unpin> Tx<T> {
    pub async fn send(&mut self, message: T) -> Result<(), std::io::Error> {
        self.0.send(message).await
    }
}
