use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use rax_ftpd::config::UserConfig;
use rax_ftpd::middleware::ServerStatistics;
use rax_ftpd::{Collaborators, Server, ServerConfig};
use tempfile::TempDir;

struct TestServer {
    addr: SocketAddr,
    root: TempDir,
    statistics: Arc<ServerStatistics>,
}

impl TestServer {
    fn path(&self, name: &str) -> std::path::PathBuf {
        self.root.path().join(name)
    }
}

fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let root = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::default();
    config.server.control_port = 0;
    config.server.server_root = root.path().to_string_lossy().into_owned();
    config.server.connection_timeout_secs = 5;
    config.users = vec![
        UserConfig {
            name: "alice".into(),
            password: "secret".into(),
            ..Default::default()
        },
        UserConfig {
            name: "guest".into(),
            password: "guest".into(),
            writable: false,
            ..Default::default()
        },
    ];
    configure(&mut config);

    let collaborators = Collaborators::standard();
    let statistics = Arc::clone(&collaborators.statistics);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let server = Server::new(config, collaborators)
                .await
                .unwrap();
            tx.send(server.local_addr().unwrap()).unwrap();
            server.start().await;
        });
    });

    let addr = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    TestServer {
        addr,
        root,
        statistics,
    }
}

struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut client = Client {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        };
        let greeting = client.reply();
        assert!(greeting.starts_with("220"), "{}", greeting);
        client
    }

    fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .unwrap();
    }

    /// Reads one complete reply, following multi-line replies to their end.
    fn reply(&mut self) -> String {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).unwrap();
            assert!(n > 0, "connection closed; got so far: {:?}", text);
            text.push_str(&line);
            let bytes = line.as_bytes();
            if bytes.len() >= 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b' ' {
                return text;
            }
        }
    }

    fn command(&mut self, line: &str) -> String {
        self.send(line);
        self.reply()
    }

    fn login(&mut self, user: &str, password: &str) {
        let reply = self.command(&format!("USER {}", user));
        assert!(reply.starts_with("331"), "{}", reply);
        let reply = self.command(&format!("PASS {}", password));
        assert!(reply.starts_with("230"), "{}", reply);
    }

    fn pasv(&mut self) -> TcpStream {
        let reply = self.command("PASV");
        assert!(reply.starts_with("227"), "{}", reply);
        let start = reply.find('(').unwrap() + 1;
        let end = reply.find(')').unwrap();
        let fields: Vec<u16> = reply[start..end]
            .split(',')
            .map(|f| f.trim().parse().unwrap())
            .collect();
        let addr = format!(
            "{}.{}.{}.{}:{}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            fields[4] * 256 + fields[5]
        );
        let data = TcpStream::connect(addr).unwrap();
        data.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        data
    }

    fn upload(&mut self, verb: &str, name: &str, content: &[u8]) -> String {
        let mut data = self.pasv();
        let reply = self.command(&format!("{} {}", verb, name));
        assert!(reply.starts_with("150"), "{}", reply);
        data.write_all(content).unwrap();
        drop(data);
        self.reply()
    }

    fn download(&mut self, name: &str) -> (Vec<u8>, String) {
        let mut data = self.pasv();
        let reply = self.command(&format!("RETR {}", name));
        assert!(reply.starts_with("150"), "{}", reply);
        let mut content = Vec::new();
        data.read_to_end(&mut content).unwrap();
        (content, self.reply())
    }
}

/// Splits a block-mode stream into (descriptor, payload) pairs.
fn parse_blocks(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut blocks = Vec::new();
    while bytes.len() >= 3 {
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        blocks.push((bytes[0], bytes[3..3 + len].to_vec()));
        bytes = &bytes[3 + len..];
    }
    assert!(bytes.is_empty(), "trailing bytes after last block");
    blocks
}

#[test]
fn commands_require_login() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);

    assert!(client.command("PWD").starts_with("530"));
    assert!(client.command("STOR x.txt").starts_with("530"));
    assert!(client.command("PASS secret").starts_with("503"));

    client.command("USER alice");
    assert!(client.command("PASS wrong").starts_with("530"));

    client.login("alice", "secret");
    let reply = client.command("PWD");
    assert!(reply.starts_with("257 \"/\""), "{}", reply);
}

#[test]
fn unknown_commands_and_quit() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);

    assert!(client.command("XYZZY").starts_with("500"));
    assert!(client.command("NOOP").starts_with("200"));
    let feat = client.command("FEAT");
    assert!(feat.starts_with("211-"), "{}", feat);
    assert!(feat.contains("MODE B"));
    assert!(client.command("QUIT").starts_with("221"));

    let mut rest = String::new();
    assert_eq!(client.reader.read_line(&mut rest).unwrap(), 0);
}

#[test]
fn ascii_upload_stores_native_line_endings() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");

    assert!(client.command("TYPE A").starts_with("200"));
    let reply = client.upload("STOR", "notes.txt", b"AB\r\nCD");
    assert!(reply.starts_with("226"), "{}", reply);

    let expected: &[u8] = if cfg!(windows) { b"AB\r\nCD" } else { b"AB\nCD" };
    assert_eq!(fs::read(server.path("notes.txt")).unwrap(), expected);

    let stats = server.statistics.snapshot();
    assert_eq!(stats.uploads, 1);
    assert_eq!(stats.logins, 1);
}

#[test]
fn ascii_download_sends_network_line_endings() {
    let server = start_server(|_| {});
    fs::write(server.path("lines.txt"), "one\ntwo\n").unwrap();

    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE A");

    let (content, reply) = client.download("lines.txt");
    assert!(reply.starts_with("226"), "{}", reply);
    assert_eq!(content, b"one\r\ntwo\r\n");
}

#[test]
fn binary_round_trip_keeps_bytes() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");

    let payload: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
    assert!(client.upload("STOR", "blob.bin", &payload).starts_with("226"));
    let (content, reply) = client.download("blob.bin");
    assert!(reply.starts_with("226"));
    assert_eq!(content, payload);
}

#[test]
fn read_only_user_cannot_store() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("guest", "guest");

    let reply = client.command("STOR forbidden.txt");
    assert!(reply.starts_with("550"), "{}", reply);
    assert!(!Path::new(&server.path("forbidden.txt")).exists());
}

#[test]
fn missing_file_is_reported_before_opening_data() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");

    let reply = client.command("RETR nothing-here.txt");
    assert!(reply.starts_with("550"), "{}", reply);
}

#[test]
fn stou_picks_a_fresh_name() {
    let server = start_server(|_| {});
    fs::write(server.path("report.txt"), "old").unwrap();

    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");

    let reply = client.upload("STOU", "report.txt", b"new");
    assert!(reply.starts_with("226"), "{}", reply);
    assert_eq!(fs::read_to_string(server.path("report.txt")).unwrap(), "old");
    assert_eq!(fs::read_to_string(server.path("report.txt.1")).unwrap(), "new");
}

#[test]
fn unique_required_rejects_overwrite() {
    let server = start_server(|config| config.limits.unique_required = true);
    fs::write(server.path("keep.txt"), "keep").unwrap();

    let mut client = Client::connect(&server);
    client.login("alice", "secret");

    let reply = client.command("STOR keep.txt");
    assert!(reply.starts_with("553"), "{}", reply);
    assert_eq!(fs::read_to_string(server.path("keep.txt")).unwrap(), "keep");
}

#[test]
fn block_mode_upload_records_restart_markers() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");
    assert!(client.command("MODE B").starts_with("200"));

    let mut stream = Vec::new();
    stream.extend_from_slice(&[0x00, 0, 5]);
    stream.extend_from_slice(b"hello");
    stream.extend_from_slice(&[0x10, 0, 1, 7]);
    stream.extend_from_slice(&[0x40, 0, 6]);
    stream.extend_from_slice(b" world");

    let reply = client.upload("STOR", "blocks.bin", &stream);
    assert!(reply.starts_with("226"), "{}", reply);
    assert_eq!(fs::read(server.path("blocks.bin")).unwrap(), b"hello world");

    let reply = client.command("REST 7");
    assert!(reply.starts_with("350 Restarting at 5"), "{}", reply);

    let (content, reply) = client.download("blocks.bin");
    assert!(reply.starts_with("226"), "{}", reply);
    let blocks = parse_blocks(&content);
    let payload: Vec<u8> = blocks.iter().flat_map(|(_, p)| p.clone()).collect();
    assert_eq!(payload, b" world");
    assert_ne!(blocks.last().unwrap().0 & 0x40, 0);
}

#[test]
fn unsupported_mode_is_refused() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");

    assert!(client.command("MODE X").starts_with("504"));
    assert!(client.command("SITE CHARSET KLINGON").starts_with("550"));
    assert!(client.command("SITE CHARSET IBM037").starts_with("200"));
}

#[test]
fn stat_and_abor_during_slow_upload() {
    let server = start_server(|config| {
        config.server.buffer_size = 512;
        config.users[0].max_upload_rate_kbps = Some(16);
    });
    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");

    let mut data = client.pasv();
    let reply = client.command("STOR slow.bin");
    assert!(reply.starts_with("150"), "{}", reply);

    let writer = thread::spawn(move || {
        let chunk = [0x5Au8; 1024];
        for _ in 0..64 {
            if data.write_all(&chunk).is_err() {
                break;
            }
        }
    });

    thread::sleep(Duration::from_millis(300));
    let status = client.command("STAT");
    assert!(status.starts_with("213 Status: "), "{}", status);
    assert!(status.contains("of unknown bytes transferred"), "{}", status);

    client.send("ABOR");
    let aborted = client.reply();
    assert!(aborted.starts_with("426"), "{}", aborted);
    let done = client.reply();
    assert!(done.starts_with("226"), "{}", done);
    writer.join().unwrap();

    let partial = fs::metadata(server.path("slow.bin")).unwrap().len();
    assert!(partial < 64 * 1024, "upload was not cut short: {}", partial);

    // The session keeps working after an abort.
    assert!(client.command("NOOP").starts_with("200"));
}

#[test]
fn abor_without_transfer() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    assert!(client.command("ABOR").starts_with("225"));
}

#[test]
fn abor_while_waiting_for_data_connection() {
    let server = start_server(|_| {});
    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");

    let reply = client.command("PASV");
    assert!(reply.starts_with("227"), "{}", reply);
    let reply = client.command("STOR never.bin");
    assert!(reply.starts_with("150"), "{}", reply);

    let started = Instant::now();
    client.send("ABOR");
    let aborted = client.reply();
    assert!(aborted.starts_with("426"), "{}", aborted);
    let done = client.reply();
    assert!(done.starts_with("226"), "{}", done);
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "abort waited for the connection timeout: {:?}",
        started.elapsed()
    );
    assert!(client.command("NOOP").starts_with("200"));
}

#[test]
fn append_past_quota_leaves_home_within_quota() {
    const QUOTA: u64 = 1024 * 1024;
    let server = start_server(|config| config.users[0].quota_mb = Some(1));
    fs::write(server.path("big.bin"), vec![1u8; (QUOTA - 100) as usize]).unwrap();

    let mut client = Client::connect(&server);
    client.login("alice", "secret");
    client.command("TYPE I");

    let mut data = client.pasv();
    let reply = client.command("APPE big.bin");
    assert!(reply.starts_with("150"), "{}", reply);
    // The server may hang up mid-write once the quota is hit.
    let _ = data.write_all(&[2u8; 8192]);
    drop(data);

    let reply = client.reply();
    assert!(reply.starts_with("552"), "{}", reply);
    let size = fs::metadata(server.path("big.bin")).unwrap().len();
    assert!(size <= QUOTA, "home over quota: {} > {}", size, QUOTA);
}

#[test]
fn too_many_clients_are_turned_away() {
    let server = start_server(|config| config.limits.max_clients = 1);
    let _first = Client::connect(&server);

    let stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    assert!(line.starts_with("421"), "{}", line);
}
