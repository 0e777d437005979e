//! RPC transport behavior over real sockets on the loopback interface.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vesper::rpc::{BincodeCodec, Client, Codec, RpcError, Server};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EchoRequest {
    payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EchoResponse {
    payload: String,
}

fn any_local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn call_roundtrip_through_server() {
    let server = Server::bind(any_local()).unwrap();
    server.register(
        "echo",
        BincodeCodec,
        |request: EchoRequest| EchoResponse {
            payload: format!("echo: {}", request.payload),
        },
    );
    let addr = server.local_addr().unwrap();
    server.serve();

    let client = Client::new(addr, "echo");
    for i in 0..3 {
        let response: EchoResponse = client
            .call(&EchoRequest {
                payload: format!("m{i}"),
            })
            .unwrap();
        assert_eq!(response.payload, format!("echo: m{i}"));
    }
}

#[test]
fn services_are_routed_by_handshake_name() {
    let server = Server::bind(any_local()).unwrap();
    server.register("one", BincodeCodec, |r: EchoRequest| EchoResponse {
        payload: format!("one: {}", r.payload),
    });
    server.register("two", BincodeCodec, |r: EchoRequest| EchoResponse {
        payload: format!("two: {}", r.payload),
    });
    let addr = server.local_addr().unwrap();
    server.serve();

    let first = Client::new(addr, "one");
    let second = Client::new(addr, "two");
    let request = EchoRequest {
        payload: "x".to_owned(),
    };
    let a: EchoResponse = first.call(&request).unwrap();
    let b: EchoResponse = second.call(&request).unwrap();
    assert_eq!(a.payload, "one: x");
    assert_eq!(b.payload, "two: x");
}

#[test]
fn large_bodies_grow_the_framing_buffer() {
    let server = Server::bind(any_local()).unwrap();
    server.register("blob", BincodeCodec, |r: Vec<u8>| {
        let mut blown_up = r.clone();
        blown_up.resize(256 * 1024, 7);
        blown_up
    });
    let addr = server.local_addr().unwrap();
    server.serve();

    let client = Client::new(addr, "blob");
    let response: Vec<u8> = client.call(&vec![1u8, 2, 3]).unwrap();
    assert_eq!(response.len(), 256 * 1024);
    assert_eq!(&response[..3], &[1, 2, 3]);
}

/// Reads the connection-open handshake and returns the service name.
fn read_handshake(stream: &mut std::net::TcpStream) -> String {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let mut name = vec![0u8; u32::from_le_bytes(len) as usize];
    stream.read_exact(&mut name).unwrap();
    String::from_utf8(name).unwrap()
}

/// Reads one framed request, returning its id and body.
fn read_request(stream: &mut std::net::TcpStream) -> (u32, Vec<u8>) {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).unwrap();
    let id = u32::from_le_bytes(header[..4].try_into().unwrap());
    let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).unwrap();
    (id, body)
}

fn write_response(stream: &mut std::net::TcpStream, id: u32, body: &[u8]) {
    stream.write_all(&id.to_le_bytes()).unwrap();
    stream.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
    stream.write_all(body).unwrap();
}

#[test]
fn stale_response_is_discarded_by_request_id() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let codec = BincodeCodec;
    let stale_body = codec.encode(&"stale".to_owned()).unwrap();
    let fresh_body = codec.encode(&"fresh".to_owned()).unwrap();

    let server = thread::spawn(move || {
        // First connection: swallow request id=1 and die before responding.
        {
            let (mut stream, _) = listener.accept().unwrap();
            assert_eq!(read_handshake(&mut stream), "svc");
            let (id, _) = read_request(&mut stream);
            assert_eq!(id, 1);
        }
        // Second connection: reply to id=2 with a late id=1 response first.
        let (mut stream, _) = listener.accept().unwrap();
        assert_eq!(read_handshake(&mut stream), "svc");
        let (id, _) = read_request(&mut stream);
        assert_eq!(id, 2);
        write_response(&mut stream, 1, &stale_body);
        write_response(&mut stream, 2, &fresh_body);
        // Hold the socket open until the client is done reading.
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::new(addr, "svc");
    let first: Result<String, RpcError> = client.call(&"one".to_owned());
    assert!(matches!(first, Err(RpcError::NoResponse)));

    let second: String = client.call(&"two".to_owned()).unwrap();
    assert_eq!(second, "fresh");
    server.join().unwrap();
}

#[test]
fn wire_format_is_little_endian_length_prefixed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        // Handshake: [u32 len]["wire"].
        let mut raw = [0u8; 4];
        stream.read_exact(&mut raw).unwrap();
        assert_eq!(raw, 4u32.to_le_bytes());
        let mut name = [0u8; 4];
        stream.read_exact(&mut name).unwrap();
        assert_eq!(&name, b"wire");

        // Request: [u32 id=1][u32 body_len][body].
        let (id, body) = read_request(&mut stream);
        assert_eq!(id, 1);
        write_response(&mut stream, id, &body);

        // The next request on the same connection carries id=2.
        let (id, body) = read_request(&mut stream);
        assert_eq!(id, 2);
        write_response(&mut stream, id, &body);
    });

    let client = Client::new(addr, "wire");
    let echoed: u64 = client.call(&17u64).unwrap();
    assert_eq!(echoed, 17);
    let echoed: u64 = client.call(&18u64).unwrap();
    assert_eq!(echoed, 18);
    server.join().unwrap();
}

#[test]
fn abort_interrupts_a_blocked_call() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept, read the request, never respond.
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_handshake(&mut stream);
        let _ = read_request(&mut stream);
        thread::sleep(Duration::from_secs(60));
    });

    let client = std::sync::Arc::new(Client::new(addr, "svc"));
    let caller = {
        let client = std::sync::Arc::clone(&client);
        thread::spawn(move || {
            let response: Result<String, RpcError> = client.call(&"hello".to_owned());
            response
        })
    };
    thread::sleep(Duration::from_millis(150));
    client.abort();
    let result = caller.join().unwrap();
    assert!(matches!(result, Err(RpcError::NoResponse)));
}

#[test]
fn dead_server_yields_no_response() {
    // Bind and drop to get an address nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let client = Client::new(addr, "svc");
    let result: Result<String, RpcError> = client.call(&"hello".to_owned());
    assert!(matches!(result, Err(RpcError::NoResponse)));
}
