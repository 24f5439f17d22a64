//! Integration tests for UDP replication, startup sync and store reopen.

use server::{App, Config, ProcessState};
use shm_cache::Flags;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

/// Get an available port for testing.
fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn get_available_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn start(config: &str) -> App {
    App::start(&Config::parse(config).unwrap(), ProcessState::default()).unwrap()
}

/// Poll `check` until it holds or five seconds pass.
fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_replication_between_nodes() {
    let port = get_available_udp_port();

    let replica = start(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64
        keysize = 16
        hashsize = 8

        [cache.replication]
        listen = ["127.0.0.1:{port}"]
        "#
    ));
    let origin = start(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64
        keysize = 16
        hashsize = 8

        [cache.replication]
        peers = ["127.0.0.1:{port}"]
        "#
    ));

    origin
        .registry()
        .set(None, b"greeting", b"hello", 60, Flags::NONE)
        .unwrap();
    assert!(eventually(|| {
        replica.registry().get(None, b"greeting").unwrap() == Some(b"hello".to_vec())
    }));

    origin
        .registry()
        .set(None, b"greeting", b"bonjour", 0, Flags::UPDATE)
        .unwrap();
    assert!(eventually(|| {
        replica.registry().get(None, b"greeting").unwrap() == Some(b"bonjour".to_vec())
    }));

    // local mutations stay local
    origin
        .registry()
        .set(None, b"private", b"x", 0, Flags::LOCAL)
        .unwrap();

    origin.registry().delete(None, b"greeting", Flags::NONE).unwrap();
    assert!(eventually(|| {
        !replica.registry().exists(None, b"greeting").unwrap()
    }));
    assert!(!replica.registry().exists(None, b"private").unwrap());

    origin.shutdown().unwrap();
    replica.shutdown().unwrap();
}

#[test]
fn test_startup_sync() {
    let port = get_available_port();
    let geometry = r#"
        max_items = 8
        blocksize = 64
        keysize = 16
        hashsize = 8
    "#;

    let source = start(&format!(
        r#"
        [[cache]]
        name = "items"
        {geometry}

        [server]
        address = "127.0.0.1:{port}"
        "#
    ));
    for (key, value) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
        source.registry().set(None, key, value, 0, Flags::NONE).unwrap();
    }

    let copy = start(&format!(
        r#"
        [[cache]]
        name = "items"
        {geometry}
        sync = "127.0.0.1:{port}"
        "#
    ));

    let cache = copy.registry().default_cache().unwrap();
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(b"b").unwrap().unwrap(), b"2");

    // the synchronized copy keeps working as a normal cache
    cache.set(b"d", b"4", 0, Flags::NONE).unwrap();
    cache.delete(b"a", Flags::NONE).unwrap();
    assert_eq!(cache.len(), 3);

    copy.shutdown().unwrap();
    source.shutdown().unwrap();
}

#[test]
fn test_sync_geometry_mismatch_fails_startup() {
    let port = get_available_port();
    let source = start(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64

        [server]
        address = "127.0.0.1:{port}"
        "#
    ));

    let config = Config::parse(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 16
        blocksize = 64
        sync = "127.0.0.1:{port}"
        "#
    ))
    .unwrap();
    assert!(App::start(&config, ProcessState::default()).is_err());

    source.shutdown().unwrap();
}

#[test]
fn test_sync_hash_mismatch_fails_startup() {
    let port = get_available_port();
    let source = start(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64
        hash = "djb33x"

        [server]
        address = "127.0.0.1:{port}"
        "#
    ));
    source
        .registry()
        .set(None, b"k", b"1", 0, Flags::NONE)
        .unwrap();

    let config = Config::parse(&format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64
        hash = "murmur2"
        sync = "127.0.0.1:{port}"
        "#
    ))
    .unwrap();
    assert!(App::start(&config, ProcessState::default()).is_err());

    source.shutdown().unwrap();
}

#[test]
fn test_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("items.cache");
    let config = format!(
        r#"
        [[cache]]
        name = "items"
        max_items = 8
        blocksize = 64
        keysize = 16
        hashsize = 8
        store = "{}"
        "#,
        store.display()
    );

    let app = start(&config);
    app.registry()
        .set(None, b"persistent", b"yes", 0, Flags::NONE)
        .unwrap();
    app.shutdown().unwrap();

    let app = start(&config);
    assert_eq!(
        app.registry().get(None, b"persistent").unwrap().unwrap(),
        b"yes"
    );
    app.shutdown().unwrap();
}

#[test]
fn test_preload_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("motd");
    std::fs::write(&file, b"welcome").unwrap();

    let app = start(&format!(
        r#"
        [[cache]]
        name = "files"
        max_items = 4
        blocksize = 64
        keysize = 255
        preload = ["{}"]
        "#,
        file.display()
    ));

    let key = file.to_str().unwrap().as_bytes();
    assert_eq!(app.registry().get(None, key).unwrap().unwrap(), b"welcome");
    app.shutdown().unwrap();
}
