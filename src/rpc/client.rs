//! RPC client: one connection, one outstanding call at a time.
//!
//! Calls are serialized by the client's mutex. On entry a broken socket is
//! dropped; with no socket the client reconnects and replays the service
//! handshake before sending. The framing buffer accumulates response bytes;
//! responses whose id does not match the in-flight request are stale
//! leftovers of an abandoned call and are silently discarded.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::primitives::Buffer;
use crate::rpc::{BincodeCodec, Codec, MessageSize, RpcError, HEADER_SIZE};

struct ClientInner {
    socket: Option<TcpStream>,
    buffer: Buffer,
    next_request_id: u32,
}

pub struct Client<C: Codec = BincodeCodec> {
    endpoint: SocketAddr,
    service_name: String,
    inner: Mutex<ClientInner>,
    /// Clone of the live socket used by `abort` to interrupt a blocked call.
    abort_handle: Mutex<Option<TcpStream>>,
    codec: C,
}

impl Client<BincodeCodec> {
    pub fn new(endpoint: SocketAddr, service_name: impl Into<String>) -> Self {
        Self::with_codec(endpoint, service_name)
    }
}

impl<C: Codec> Client<C> {
    pub fn with_codec(endpoint: SocketAddr, service_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            service_name: service_name.into(),
            inner: Mutex::new(ClientInner {
                socket: None,
                buffer: Buffer::new(),
                next_request_id: 0,
            }),
            abort_handle: Mutex::new(None),
            codec: C::default(),
        }
    }

    /// Sends `request` and blocks until the matching response arrives.
    /// Every transport failure drops the socket and surfaces as
    /// [`RpcError::NoResponse`]; the next call reconnects.
    pub fn call<Req, Res>(&self, request: &Req) -> Result<Res, RpcError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let mut inner = self.inner.lock();
        inner.next_request_id += 1;
        let request_id = inner.next_request_id;

        // The server may have gone away since the last call; probe the socket
        // error state instead of discovering it mid-write.
        if let Some(socket) = &inner.socket {
            if matches!(socket.take_error(), Ok(Some(_)) | Err(_)) {
                inner.socket = None;
            }
        }

        if inner.socket.is_none() {
            inner.buffer.clear();
            let socket = match TcpStream::connect(self.endpoint) {
                Ok(socket) => socket,
                Err(err) => {
                    error!(endpoint = %self.endpoint, %err, "could not connect to remote address");
                    return Err(RpcError::NoResponse);
                }
            };
            let _ = socket.set_nodelay(true);
            *self.abort_handle.lock() = socket.try_clone().ok();
            inner.socket = Some(socket);

            // Handshake: service name length, then the name itself.
            let name_len = (self.service_name.len() as MessageSize).to_le_bytes();
            if self.write_all(&mut inner, &name_len).is_err()
                || self.write_all(&mut inner, self.service_name.as_bytes()).is_err()
            {
                error!("could not send service handshake");
                return Err(RpcError::NoResponse);
            }
        }

        let body = self.codec.encode(request)?;
        if body.len() > MessageSize::MAX as usize {
            return Err(RpcError::MessageTooLarge(body.len()));
        }

        if self
            .write_all(&mut inner, &request_id.to_le_bytes())
            .and_then(|_| self.write_all(&mut inner, &(body.len() as MessageSize).to_le_bytes()))
            .and_then(|_| self.write_all(&mut inner, &body))
            .is_err()
        {
            error!("could not send request");
            return Err(RpcError::NoResponse);
        }

        loop {
            // Drain every complete message already buffered before touching
            // the socket again.
            while inner.buffer.size() >= HEADER_SIZE {
                let data = inner.buffer.data();
                let response_id =
                    u32::from_le_bytes(data[..4].try_into().expect("sliced to width"));
                let body_len =
                    MessageSize::from_le_bytes(data[4..8].try_into().expect("sliced to width"))
                        as usize;
                let total = HEADER_SIZE + body_len;
                inner.buffer.resize(total);
                if inner.buffer.size() < total {
                    break;
                }
                let decoded = self.codec.decode(&inner.buffer.data()[HEADER_SIZE..total]);
                inner.buffer.shift(total);
                let response = match decoded {
                    Ok(response) => response,
                    Err(err) => {
                        inner.socket = None;
                        return Err(err);
                    }
                };
                if response_id != request_id {
                    // Stale response from a previously abandoned call.
                    debug!(response_id, request_id, "discarding stale response");
                    continue;
                }
                return Ok(response);
            }

            let ClientInner { socket, buffer, .. } = &mut *inner;
            let Some(stream) = socket.as_mut() else {
                return Err(RpcError::NoResponse);
            };
            let region = buffer.allocate();
            match stream.read(region) {
                Ok(0) | Err(_) => {
                    inner.socket = None;
                    return Err(RpcError::NoResponse);
                }
                Ok(received) => inner.buffer.written(received),
            }
        }
    }

    /// Interrupts an in-flight call by shutting the socket down; the blocked
    /// call returns [`RpcError::NoResponse`] and the next call reconnects.
    pub fn abort(&self) {
        if let Some(socket) = self.abort_handle.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn write_all(&self, inner: &mut ClientInner, bytes: &[u8]) -> Result<(), RpcError> {
        let Some(socket) = inner.socket.as_mut() else {
            return Err(RpcError::NoResponse);
        };
        if socket.write_all(bytes).is_err() {
            inner.socket = None;
            return Err(RpcError::NoResponse);
        }
        Ok(())
    }
}
