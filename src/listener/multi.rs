//! Multi listener
//!
//! Aggregates any number of raw listeners, each with its own matcher chain,
//! into a single `accept()` stream of sniffed connections.
//!
//! Every raw listener gets one accept task. The task accepts, sniffs and
//! publishes connections strictly one after another, so connections from one
//! listener arrive in acceptance order. All tasks publish into one bounded
//! channel; when nobody calls `accept()` the tasks block on it and new
//! connections wait in the OS backlog.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use metrics::counter;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::common::{format_listen_url, SniffError, Result};
use crate::config::SniffConfig;
use crate::protocol::{MatcherChain, Protocol};
use super::conn::{sniff, SniffedConn};
use super::raw::{listen_any, BoxedStream, RawListener};

/// Connection published by the multi listener
pub type Conn = SniffedConn<BoxedStream>;

/// Counter of published connections, labelled by protocol
const CONNECTIONS_METRIC: &str = "sniffer_connections_total";
/// Counter of published errors, labelled by kind
const ERRORS_METRIC: &str = "sniffer_errors_total";

/// One registered raw listener
struct ListenerHandle {
    network: String,
    /// Address as requested by the caller
    addr: String,
    /// Address the listener is actually bound to
    local_addr: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    fn url(&self) -> String {
        format_listen_url(&self.network, &self.local_addr)
    }

    /// Stop the accept task and wait for it
    async fn shutdown(self) -> std::result::Result<(), String> {
        let url = self.url();
        // The task may already be gone after an accept error.
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(()) => {
                info!("Listener {} closed", url);
                Ok(())
            }
            Err(e) => Err(format!("{}: {}", url, e)),
        }
    }
}

/// Many listeners, one accept stream
pub struct MultiListener {
    listeners: RwLock<Vec<ListenerHandle>>,
    /// Kept so `recv` only ends when the listener is closed
    tx: mpsc::Sender<Result<Conn>>,
    rx: Mutex<mpsc::Receiver<Result<Conn>>>,
    closed: watch::Sender<bool>,
    config: Arc<SniffConfig>,
}

impl Default for MultiListener {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiListener {
    /// Create an empty multi listener with the default configuration
    pub fn new() -> Self {
        Self::with_config(Arc::new(SniffConfig::default()))
    }

    /// Create an empty multi listener
    ///
    /// `config` provides the channel capacity, the TCP backlog and the
    /// per matcher deadline.
    pub fn with_config(config: Arc<SniffConfig>) -> Self {
        let (tx, rx) = mpsc::channel(config.accept_backlog.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
            rx: Mutex::new(rx),
            closed,
            config,
        }
    }

    /// Shared configuration
    pub fn config(&self) -> &Arc<SniffConfig> {
        &self.config
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Open a listener on `network://addr` and start accepting on it
    ///
    /// Failing to open the listener is reported immediately. Returns the
    /// address the listener is bound to, which differs from `addr` when
    /// binding port 0.
    pub async fn add_listen(&self, network: &str, addr: &str, chain: MatcherChain) -> Result<String> {
        if self.is_closed() {
            return Err(SniffError::Closed);
        }
        let ln = listen_any(network, addr, self.config.listen_backlog).await?;
        self.register(network, addr, ln, chain).await
    }

    /// Start accepting on an already open listener
    pub async fn add_listener(&self, ln: Box<dyn RawListener>, chain: MatcherChain) -> Result<()> {
        if self.is_closed() {
            return Err(SniffError::Closed);
        }
        let network = ln.network().to_string();
        let addr = ln.local_addr()?;
        self.register(&network, &addr, ln, chain).await.map(|_| ())
    }

    async fn register(
        &self,
        network: &str,
        addr: &str,
        ln: Box<dyn RawListener>,
        chain: MatcherChain,
    ) -> Result<String> {
        let local_addr = ln.local_addr()?;
        let (stop, stop_rx) = watch::channel(false);

        let worker = AcceptLoop {
            ln,
            chain,
            network: network.to_string(),
            addr: local_addr.clone(),
            timeout: self.config.match_timeout(),
            tx: self.tx.clone(),
            stop: stop_rx,
        };

        let mut listeners = self.listeners.write().await;
        // Checked again under the lock so `close` cannot miss this listener.
        if self.is_closed() {
            return Err(SniffError::Closed);
        }

        info!(
            "Listening on {} with matchers {:?}",
            format_listen_url(network, &local_addr),
            worker.chain
        );
        let task = tokio::spawn(worker.run());
        listeners.push(ListenerHandle {
            network: network.to_string(),
            addr: addr.to_string(),
            local_addr: local_addr.clone(),
            stop,
            task,
        });

        Ok(local_addr)
    }

    /// Wait for the next sniffed connection or error
    ///
    /// Returns `None` once the multi listener is closed, on every call and
    /// without blocking. This is the shutdown signal, not an error.
    pub async fn accept(&self) -> Option<Result<Conn>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return None;
        }

        let mut rx = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => return None,
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => None,
            item = rx.recv() => item,
        }
    }

    /// Stop and remove one listener
    ///
    /// `addr` may be the requested or the bound address. Other listeners
    /// and pending `accept` calls are unaffected.
    pub async fn close_one(&self, network: &str, addr: &str) -> Result<()> {
        let handle = {
            let mut listeners = self.listeners.write().await;
            let pos = listeners
                .iter()
                .position(|l| l.network == network && (l.addr == addr || l.local_addr == addr))
                .ok_or_else(|| SniffError::ListenerNotFound(format_listen_url(network, addr)))?;
            listeners.remove(pos)
        };

        handle.shutdown().await.map_err(|e| SniffError::Close(vec![e]))
    }

    /// Stop every listener
    ///
    /// Safe to call more than once; later calls return `Ok(())`. Failures of
    /// individual accept tasks are collected into one `SniffError::Close`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        let handles: Vec<ListenerHandle> = self.listeners.write().await.drain(..).collect();
        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                failures.push(e);
            }
        }

        // Release connections nobody is going to accept anymore. Pending
        // accepts have seen the closed flag and give the receiver up.
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
        drop(rx);

        info!("Multi listener closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SniffError::Close(failures))
        }
    }

    /// `network://address` of every registered listener
    pub async fn addrs(&self) -> Vec<String> {
        self.listeners
            .read()
            .await
            .iter()
            .map(ListenerHandle::url)
            .collect()
    }
}

/// Accept task state for one raw listener
struct AcceptLoop {
    ln: Box<dyn RawListener>,
    chain: MatcherChain,
    network: String,
    addr: String,
    timeout: Duration,
    tx: mpsc::Sender<Result<Conn>>,
    stop: watch::Receiver<bool>,
}

impl AcceptLoop {
    async fn run(mut self) {
        let url = format_listen_url(&self.network, &self.addr);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.stop.wait_for(|s| *s) => break,
                accepted = self.ln.accept() => accepted,
            };

            let (raw, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed on {}, listener stops: {}", url, e);
                    counter!(ERRORS_METRIC, "kind" => "accept").increment(1);
                    let err = SniffError::Accept {
                        network: self.network.clone(),
                        addr: self.addr.clone(),
                        source: e,
                    };
                    self.publish(Err(err)).await;
                    break;
                }
            };

            let sniffed = tokio::select! {
                biased;
                _ = self.stop.wait_for(|s| *s) => break,
                sniffed = sniff(raw, &self.chain, self.timeout, &self.network, &self.addr, peer) => sniffed,
            };

            let item = match sniffed {
                Ok(conn) => {
                    let label = conn
                        .sniffed_info()
                        .protocols
                        .first()
                        .map(Protocol::as_str)
                        .unwrap_or("unknown");
                    counter!(CONNECTIONS_METRIC, "protocol" => label).increment(1);
                    Ok(conn)
                }
                Err(e) => {
                    warn!("Sniffing failed on {}: {}", url, e);
                    counter!(ERRORS_METRIC, "kind" => "sniff").increment(1);
                    Err(SniffError::Sniff {
                        network: self.network.clone(),
                        addr: self.addr.clone(),
                        source: Box::new(e),
                    })
                }
            };

            if !self.publish(item).await {
                break;
            }
        }

        debug!("Accept loop for {} stopped", url);
    }

    /// Push a result onto the shared channel, `false` once stopped
    async fn publish(&mut self, item: Result<Conn>) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.wait_for(|s| *s) => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }
}
