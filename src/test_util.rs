//! Fixtures shared by unit tests across modules.

use crate::bencode::{encode, Dict, Value};
use crate::metainfo::Metainfo;
use crate::peer::{Bitfield, Handshake, Message, PeerError, PeerTransport};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Deterministic, non-repeating-looking content.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
}

pub(crate) fn piece_hashes(content: &[u8], piece_length: usize) -> Vec<u8> {
    content
        .chunks(piece_length)
        .flat_map(|chunk| <[u8; 20]>::from(Sha1::digest(chunk)))
        .collect()
}

/// Builds `.torrent` bytes for a piece of test content.
pub(crate) struct TorrentFixture {
    name: String,
    piece_length: usize,
    content: Vec<u8>,
    files: Option<Vec<(Vec<String>, u64)>>,
    announce: Vec<String>,
}

impl TorrentFixture {
    pub(crate) fn new(content: Vec<u8>, piece_length: usize) -> Self {
        Self {
            name: "test.bin".into(),
            piece_length,
            content,
            files: None,
            announce: Vec::new(),
        }
    }

    pub(crate) fn name(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    /// Splits the content into files; lengths must add up to the content length.
    pub(crate) fn files(mut self, files: &[(&[&str], u64)]) -> Self {
        self.files = Some(
            files
                .iter()
                .map(|(path, len)| (path.iter().map(|s| s.to_string()).collect(), *len))
                .collect(),
        );
        self
    }

    /// The first call sets `announce`, later calls add `announce-list` tiers.
    pub(crate) fn announce(mut self, url: &str) -> Self {
        self.announce.push(url.into());
        self
    }

    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }

    pub(crate) fn info(&self) -> Dict {
        let mut info = Dict::new();
        match &self.files {
            None => {
                info.insert(&b"length"[..], Value::Integer(self.content.len() as i64));
            }
            Some(files) => {
                let list = files
                    .iter()
                    .map(|(path, len)| {
                        let mut file = Dict::new();
                        file.insert(&b"length"[..], Value::Integer(*len as i64));
                        file.insert(
                            &b"path"[..],
                            Value::List(path.iter().map(|p| Value::string(p)).collect()),
                        );
                        Value::Dict(file)
                    })
                    .collect();
                info.insert(&b"files"[..], Value::List(list));
            }
        }
        info.insert(&b"name"[..], Value::string(&self.name));
        info.insert(&b"piece length"[..], Value::Integer(self.piece_length as i64));
        info.insert(
            &b"pieces"[..],
            Value::from(piece_hashes(&self.content, self.piece_length).as_slice()),
        );
        info
    }

    pub(crate) fn value(&self) -> Value {
        let mut root = Dict::new();
        if let Some(first) = self.announce.first() {
            root.insert(&b"announce"[..], Value::string(first));
        }
        if self.announce.len() > 1 {
            let tiers = self
                .announce
                .iter()
                .map(|url| Value::List(vec![Value::string(url)]))
                .collect();
            root.insert(&b"announce-list"[..], Value::List(tiers));
        }
        root.insert(&b"info"[..], Value::Dict(self.info()));
        Value::Dict(root)
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        encode(&self.value())
    }

    pub(crate) fn metainfo(&self) -> Metainfo {
        Metainfo::from_bytes(&self.bytes()).unwrap()
    }
}

/// Bencoded tracker response listing `peers` in compact form.
pub(crate) fn peers_body(peers: &[SocketAddr]) -> Vec<u8> {
    let mut compact = Vec::new();
    for addr in peers {
        if let SocketAddr::V4(v4) = addr {
            compact.extend_from_slice(&v4.ip().octets());
            compact.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    let mut dict = Dict::new();
    dict.insert(&b"interval"[..], Value::Integer(1800));
    dict.insert(&b"peers"[..], Value::from(compact.as_slice()));
    encode(&Value::Dict(dict))
}

pub(crate) fn failure_body(reason: &str) -> Vec<u8> {
    let mut dict = Dict::new();
    dict.insert(&b"failure reason"[..], Value::string(reason));
    encode(&Value::Dict(dict))
}

/// An HTTP server on loopback that answers every request with a fixed body
/// and records the request lines it saw.
pub(crate) struct MockHttpTracker {
    pub(crate) url: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockHttpTracker {
    pub(crate) async fn start(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/announce", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let body = body.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head);
                    if let Some(line) = head.lines().next() {
                        seen.lock().push(line.to_string());
                    }
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            url,
            requests,
            handle,
        }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Drop for MockHttpTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// How a [`MockSeeder`] misbehaves.
#[derive(Debug, Clone, Default)]
pub(crate) struct SeederOptions {
    /// Answer handshakes with this info hash instead of the torrent's.
    pub(crate) info_hash: Option<[u8; 20]>,
    /// Pieces advertised in the bitfield; all of them when `None`.
    pub(crate) pieces: Option<Vec<usize>>,
    /// Pieces whose first block is corrupted the first time it is served.
    pub(crate) corrupt_once: Vec<u32>,
    /// Close each connection after serving this many blocks.
    pub(crate) close_after_blocks: Option<usize>,
    /// Accept requests but never answer them.
    pub(crate) silent: bool,
    /// Wait this long before answering each request.
    pub(crate) delay: Option<Duration>,
    /// Hold requests until the client pauses, then answer the batch newest
    /// first.
    pub(crate) reverse: bool,
    /// Send no bitfield. Unchoke right away, then announce every piece with
    /// `have` after this delay.
    pub(crate) lazy_have: Option<Duration>,
}

#[derive(Debug, Default)]
pub(crate) struct SeederStats {
    pub(crate) connections: AtomicUsize,
    pub(crate) requests: AtomicUsize,
    pub(crate) cancels: AtomicUsize,
    pub(crate) blocks_sent: AtomicUsize,
}

struct SeederShared {
    info_hash: [u8; 20],
    piece_length: usize,
    content: Vec<u8>,
    options: SeederOptions,
    corrupted: Mutex<HashSet<u32>>,
    stats: Arc<SeederStats>,
}

/// A peer on loopback that serves a fixture's content.
pub(crate) struct MockSeeder {
    pub(crate) addr: SocketAddr,
    pub(crate) stats: Arc<SeederStats>,
    handle: JoinHandle<()>,
}

impl MockSeeder {
    pub(crate) async fn start(fixture: &TorrentFixture, options: SeederOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(SeederStats::default());
        let metainfo = fixture.metainfo();
        let shared = Arc::new(SeederShared {
            info_hash: options
                .info_hash
                .unwrap_or(*metainfo.info_hash.as_bytes()),
            piece_length: metainfo.info.piece_length as usize,
            content: fixture.content().to_vec(),
            options,
            corrupted: Mutex::new(HashSet::new()),
            stats: stats.clone(),
        });

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                shared.stats.connections.fetch_add(1, Ordering::SeqCst);
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &shared).await;
                });
            }
        });

        Self {
            addr,
            stats,
            handle,
        }
    }
}

impl Drop for MockSeeder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, shared: &SeederShared) -> Result<(), PeerError> {
    let piece_count = shared.content.len().div_ceil(shared.piece_length);
    let mut transport = PeerTransport::new(stream);
    let ours = Handshake::new(shared.info_hash, *b"-MK0001-000000000000");
    transport.handshake(&ours, Duration::from_secs(5)).await?;

    let mut have = Bitfield::new(piece_count);
    match &shared.options.pieces {
        Some(pieces) => pieces.iter().for_each(|&p| have.set_piece(p)),
        None => (0..piece_count).for_each(|p| have.set_piece(p)),
    }
    match shared.options.lazy_have {
        Some(delay) => {
            transport.send_message(&Message::Unchoke).await?;
            tokio::time::sleep(delay).await;
            for piece in have.pieces() {
                transport
                    .send_message(&Message::Have {
                        piece: piece as u32,
                    })
                    .await?;
            }
        }
        None => {
            transport
                .send_message(&Message::Bitfield(have.to_bytes()))
                .await?
        }
    }

    let mut served = 0usize;
    let mut backlog: Vec<(u32, u32, u32)> = Vec::new();
    loop {
        let message = if backlog.is_empty() {
            transport.receive_message().await?
        } else {
            match tokio::time::timeout(Duration::from_millis(50), transport.receive_message()).await
            {
                Ok(message) => message?,
                Err(_) => {
                    for (index, begin, length) in backlog.drain(..).rev() {
                        send_block(&mut transport, shared, index, begin, length).await?;
                        served += 1;
                    }
                    continue;
                }
            }
        };

        match message {
            Message::Interested => transport.send_message(&Message::Unchoke).await?,
            Message::Request {
                index,
                begin,
                length,
            } => {
                shared.stats.requests.fetch_add(1, Ordering::SeqCst);
                if shared.options.silent {
                    continue;
                }
                if shared.options.close_after_blocks == Some(served) {
                    transport.shutdown().await?;
                    while transport.receive_message().await.is_ok() {}
                    return Ok(());
                }
                if shared.options.reverse {
                    backlog.push((index, begin, length));
                    continue;
                }
                if let Some(delay) = shared.options.delay {
                    tokio::time::sleep(delay).await;
                }
                send_block(&mut transport, shared, index, begin, length).await?;
                served += 1;
            }
            Message::Cancel { .. } => {
                shared.stats.cancels.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

async fn send_block(
    transport: &mut PeerTransport,
    shared: &SeederShared,
    index: u32,
    begin: u32,
    length: u32,
) -> Result<(), PeerError> {
    let start = index as usize * shared.piece_length + begin as usize;
    let mut data = shared.content[start..start + length as usize].to_vec();
    if begin == 0
        && shared.options.corrupt_once.contains(&index)
        && shared.corrupted.lock().insert(index)
    {
        data[0] ^= 0xFF;
    }
    transport
        .send_message(&Message::Piece {
            index,
            begin,
            data: data.into(),
        })
        .await?;
    shared.stats.blocks_sent.fetch_add(1, Ordering::SeqCst);
    Ok(())
}
