#![allow(unused)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recovery_scanner::bitcoin::{Address, Network};
use recovery_scanner::electrum::ScriptHash;
use recovery_scanner::{
    AddressGenerator, ElectrumConfig, Pool, Report, ScanAddress, Scanner, ScannerConfig,
    ServerProvider, WalletAddress,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TEST_DESCRIPTOR: &str = "wpkh(tpubD6NzVbkrYhZ4Xferm7Pz4VnjdcDPFyjVu5K4iZXQ4pVN8Cks4pHVowTBXBKRhX64pkRyJZJN5xAKj4UDNnLPb5p2sSKXhewoYx5GbTdUFWq/0/*)";

pub const TEST_TXID: &str = "a1aa2b52fb79641f918d44a27f51781c3c0c49f7ee0e4b14dbb37c722853f046";

pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// The first `count` receive addresses of the test wallet
pub fn test_addresses(count: u32) -> Vec<WalletAddress> {
    AddressGenerator::new(Network::Testnet, count)
        .unwrap()
        .with_descriptor(3, TEST_DESCRIPTOR)
        .unwrap()
        .iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// How the mock server behaves
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Implementation name returned by `server.version`
    pub server_impl: String,
    /// `listunspent` answers, by script hash
    pub utxos: HashMap<String, Vec<Value>>,
    /// Answer batches in reverse order
    pub permute_batches: bool,
    /// Close the first `n` connections without answering
    pub fail_first_connections: usize,
    /// Answer every `listunspent` with an error
    pub fail_calls: bool,
    /// Never answer `server.version`
    pub hang: bool,
    /// Wait before answering every request
    pub call_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        MockConfig {
            server_impl: "ElectrumX 1.16.0".to_string(),
            utxos: HashMap::new(),
            permute_batches: false,
            fail_first_connections: 0,
            fail_calls: false,
            hang: false,
            call_delay: Duration::from_millis(0),
        }
    }
}

impl MockConfig {
    /// Give `address` an unspent output of `value` sats
    pub fn fund(&mut self, address: &WalletAddress, vout: u32, value: u64) {
        let script = address.script_pubkey(Network::Testnet).unwrap();
        self.utxos
            .entry(ScriptHash::new(&script).to_string())
            .or_default()
            .push(json!({
                "height": 2_500_000,
                "tx_pos": vout,
                "value": value,
                "tx_hash": TEST_TXID,
            }));
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub tls_attempts: AtomicUsize,
    pub connections: AtomicUsize,
    pub active_connections: AtomicUsize,
    pub max_active_connections: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub single_lookups: AtomicUsize,
    pub lookups: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Gauge<'a> {
    current: &'a AtomicUsize,
}

impl<'a> Gauge<'a> {
    fn enter(current: &'a AtomicUsize, max: &'a AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Gauge { current }
    }
}

impl<'a> Drop for Gauge<'a> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An Electrum server speaking plain TCP on localhost
///
/// TLS handshakes are rejected, so clients connect through their plain TCP fallback.
pub struct MockServer {
    addr: SocketAddr,
    pub stats: Arc<Stats>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let config = Arc::new(config);

        let handle = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => return,
                    };
                    tokio::spawn(handle_connection(
                        stream,
                        Arc::clone(&config),
                        Arc::clone(&stats),
                    ));
                }
            })
        };

        MockServer {
            addr,
            stats,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, config: Arc<MockConfig>, stats: Arc<Stats>) {
    let mut first = [0u8; 1];
    match stream.peek(&mut first).await {
        Ok(n) if n > 0 => {}
        _ => return,
    }
    // TLS ClientHello
    if first[0] == 0x16 {
        stats.tls_attempts.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let index = stats.connections.fetch_add(1, Ordering::SeqCst);
    if index < config.fail_first_connections {
        return;
    }
    let _active = Gauge::enter(&stats.active_connections, &stats.max_active_connections);

    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let req: Value = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(_) => return,
        };

        let _in_flight = Gauge::enter(&stats.in_flight, &stats.max_in_flight);
        if !config.call_delay.is_zero() {
            tokio::time::sleep(config.call_delay).await;
        }

        let resp = match req {
            Value::Array(reqs) => {
                stats.batch_calls.fetch_add(1, Ordering::SeqCst);
                let mut answers = Vec::with_capacity(reqs.len());
                for req in &reqs {
                    answers.push(answer(req, &config, &stats).await);
                }
                if config.permute_batches {
                    answers.reverse();
                }
                Value::Array(answers)
            }
            req => {
                if req["method"] == "blockchain.scripthash.listunspent" {
                    stats.single_lookups.fetch_add(1, Ordering::SeqCst);
                }
                answer(&req, &config, &stats).await
            }
        };

        let mut raw = serde_json::to_vec(&resp).unwrap();
        raw.push(b'\n');
        if write.write_all(&raw).await.is_err() {
            return;
        }
    }
}

async fn answer(req: &Value, config: &MockConfig, stats: &Stats) -> Value {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default();

    match method {
        "server.version" => {
            if config.hang {
                std::future::pending::<()>().await;
            }
            json!({"jsonrpc": "2.0", "id": id, "result": [config.server_impl, "1.4"]})
        }
        "blockchain.scripthash.listunspent" => {
            stats.lookups.fetch_add(1, Ordering::SeqCst);
            if config.fail_calls {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -101, "message": "excessive resource usage"},
                });
            }

            let hash = req["params"][0].as_str().unwrap_or_default();
            let utxos = config.utxos.get(hash).cloned().unwrap_or_default();
            json!({"jsonrpc": "2.0", "id": id, "result": utxos})
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("unknown method {}", method)},
        }),
    }
}

/// A scanner connected to `server` only
pub fn test_scanner(
    server: &MockServer,
    pool_size: usize,
    batch_size: usize,
    task_timeout_secs: u64,
) -> Scanner {
    let pool = Pool::new(ElectrumConfig {
        servers: vec![server.endpoint()],
        pool_size,
        connection_timeout_secs: 5,
        call_timeout_secs: 5,
        ..Default::default()
    })
    .unwrap();
    let servers = Arc::new(ServerProvider::from_config(pool.config()).unwrap());

    Scanner::new(
        pool,
        servers,
        Network::Testnet,
        ScannerConfig {
            batch_size,
            task_timeout_secs,
        },
    )
    .unwrap()
}

/// Read every report until the stream ends
pub async fn drain<A>(mut reports: mpsc::Receiver<Report<A>>) -> Vec<Report<A>> {
    let mut all = Vec::new();
    while let Some(report) = reports.recv().await {
        all.push(report);
    }
    all
}

/// Check that the reports only ever grow, and that only the last one can carry an error
pub fn assert_monotonic<A>(reports: &[Report<A>]) {
    for pair in reports.windows(2) {
        assert!(pair[0].scanned_addresses <= pair[1].scanned_addresses);
        assert!(pair[0].utxos_found.len() <= pair[1].utxos_found.len());
        assert!(!pair[0].is_error());
    }
}
