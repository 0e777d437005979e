//! RPC server: service-routed request handling over the shared framing.
//!
//! One OS thread per connection. The first bytes of a connection carry the
//! service handshake; every subsequent request is dispatched to the handler
//! registered under that name and answered with the request's own id.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::rpc::{Codec, MessageSize, RpcError};

type RawHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, RpcError> + Send + Sync>;

pub struct Server {
    listener: TcpListener,
    handlers: Arc<RwLock<HashMap<String, RawHandler>>>,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers the handler backing one service name. The codec wraps the
    /// typed function into the raw byte handler used on the wire.
    pub fn register<C, Req, Res, F>(&self, service_name: &str, codec: C, handler: F)
    where
        C: Codec + 'static,
        Req: DeserializeOwned,
        Res: Serialize,
        F: Fn(Req) -> Res + Send + Sync + 'static,
    {
        let raw: RawHandler = Arc::new(move |bytes| {
            let request: Req = codec.decode(bytes)?;
            codec.encode(&handler(request))
        });
        self.handlers
            .write()
            .insert(service_name.to_owned(), raw);
    }

    /// Accept loop on a background thread. Connections run until either end
    /// closes or a framing error occurs.
    pub fn serve(self) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for connection in self.listener.incoming() {
                let Ok(stream) = connection else {
                    continue;
                };
                let handlers = Arc::clone(&self.handlers);
                thread::spawn(move || {
                    if let Err(err) = serve_connection(stream, handlers) {
                        debug!(%err, "connection closed");
                    }
                });
            }
        })
    }
}

fn serve_connection(
    mut stream: TcpStream,
    handlers: Arc<RwLock<HashMap<String, RawHandler>>>,
) -> io::Result<()> {
    // Handshake identifies the service once per connection.
    let name_len = read_u32(&mut stream)? as usize;
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name)?;
    let service_name = String::from_utf8(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "service name is not UTF-8"))?;

    let Some(handler) = handlers.read().get(&service_name).cloned() else {
        warn!(service_name, "no handler registered for service");
        return Ok(());
    };
    debug!(service_name, "connection established");

    loop {
        let request_id = match read_u32(&mut stream) {
            Ok(id) => id,
            // Clean shutdown between requests.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        let body_len = read_u32(&mut stream)? as usize;
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body)?;

        let response = handler(&body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

        stream.write_all(&request_id.to_le_bytes())?;
        stream.write_all(&(response.len() as MessageSize).to_le_bytes())?;
        stream.write_all(&response)?;
    }
}

fn read_u32(stream: &mut TcpStream) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    stream.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
