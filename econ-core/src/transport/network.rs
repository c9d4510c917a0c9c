//! Networked links between city processes.
//!
//! A TCP connection is a two-way link, or a one-way link from the dialer to
//! the listener when the dialer asks for [`Direction::OneWay`]. After both
//! sides exchange a [`Hello`], a reader task decodes incoming merchant lines
//! into the city's inbound queue and a writer task drains the outbound queue
//! onto the socket. Either task ending cancels the connection's token, which
//! stops the other. A supervisor then reports the teardown (and any merchants
//! that never left) to the city through its [`LinkRegistrar`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::agents::Merchant;
use crate::config::TransportConfig;
use crate::error::{LinkError, TransportError};
use crate::transport::wire::{self, Direction, Hello, PROTOCOL_VERSION};
use crate::transport::{InboundLink, LinkClosed, LinkId, LinkRegistrar, OutboundLink, SendError};
use crate::types::CityName;

type Lines = Framed<TcpStream, LinesCodec>;

// ============================================================================
// Link halves
// ============================================================================

/// Outbound half of a TCP link. Sends only enqueue; the writer task does I/O.
#[derive(Debug)]
pub struct NetSender {
    id: LinkId,
    remote: CityName,
    tx: mpsc::Sender<Merchant>,
    token: CancellationToken,
}

impl OutboundLink for NetSender {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &CityName {
        &self.remote
    }

    fn try_send(&self, merchant: Merchant) -> Result<(), SendError> {
        if self.token.is_cancelled() {
            return Err(SendError::Closed(merchant));
        }
        match self.tx.try_send(merchant) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(m)) => Err(SendError::Full(m)),
            Err(TrySendError::Closed(m)) => Err(SendError::Closed(m)),
        }
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    fn close(&self) {
        self.token.cancel();
    }
}

/// Inbound half of a TCP link, fed by the reader task.
#[derive(Debug)]
pub struct NetReceiver {
    id: LinkId,
    remote: CityName,
    rx: mpsc::Receiver<Merchant>,
    token: CancellationToken,
}

impl InboundLink for NetReceiver {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &CityName {
        &self.remote
    }

    fn try_receive(&mut self) -> Result<Option<Merchant>, LinkClosed> {
        match self.rx.try_recv() {
            Ok(merchant) => Ok(Some(merchant)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(LinkClosed),
        }
    }

    fn close(&self) {
        self.token.cancel();
    }
}

// ============================================================================
// Port
// ============================================================================

/// Link halves a connection gives the local city.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Halves {
    inbound: bool,
    outbound: bool,
}

impl Halves {
    fn overlaps(self, other: Halves) -> bool {
        (self.inbound && other.inbound) || (self.outbound && other.outbound)
    }
}

/// Which end of the connection this side is.
#[derive(Debug, Clone, Copy)]
enum Role {
    Dialer(Direction),
    Listener,
}

struct PortShared {
    city: CityName,
    registrar: LinkRegistrar,
    config: TransportConfig,
    /// Halves held per remote city with a live connection.
    peers: Mutex<HashMap<CityName, Halves>>,
    shutdown: CancellationToken,
}

impl PortShared {
    /// Reserve link halves toward `remote`. Fails if any is already held.
    fn claim(&self, remote: &CityName, halves: Halves) -> bool {
        let mut peers = self.peers.lock();
        let held = peers.entry(remote.clone()).or_default();
        if held.overlaps(halves) {
            return false;
        }
        held.inbound |= halves.inbound;
        held.outbound |= halves.outbound;
        true
    }

    fn release(&self, remote: &CityName, halves: Halves) {
        let mut peers = self.peers.lock();
        if let Some(held) = peers.get_mut(remote) {
            held.inbound &= !halves.inbound;
            held.outbound &= !halves.outbound;
            if *held == Halves::default() {
                peers.remove(remote);
            }
        }
    }
}

/// Listens for peer cities and dials out to them on behalf of one city.
pub struct NetworkPort {
    local_addr: SocketAddr,
    shared: Arc<PortShared>,
}

impl NetworkPort {
    /// Bind to `addr`, walking up to `port_search_span` further ports when the
    /// requested one is taken, and start accepting peers.
    ///
    /// Must be called within a tokio runtime.
    pub async fn bind(
        addr: SocketAddr,
        registrar: LinkRegistrar,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let listener = bind_with_search(addr, config.port_search_span).await?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(PortShared {
            city: registrar.city().clone(),
            registrar,
            config,
            peers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        tracing::debug!(city = %shared.city, %local_addr, "listening for peer cities");
        tokio::spawn(accept_loop(listener, shared.clone()));

        Ok(Self { local_addr, shared })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn city(&self) -> &CityName {
        &self.shared.city
    }

    /// Dial a peer city and set up a two-way link to it. Returns the peer's
    /// name.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<CityName, TransportError> {
        self.dial(addr, Direction::Both).await
    }

    /// Dial a peer city for a link that only carries merchants from here to
    /// there.
    pub async fn connect_one_way(
        &self,
        addr: impl ToSocketAddrs,
    ) -> Result<CityName, TransportError> {
        self.dial(addr, Direction::OneWay).await
    }

    async fn dial(
        &self,
        addr: impl ToSocketAddrs,
        direction: Direction,
    ) -> Result<CityName, TransportError> {
        let stream = timeout(self.shared.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout("connecting"))??;
        establish(stream, self.shared.clone(), Role::Dialer(direction)).await
    }

    /// Cities with a live connection through this port.
    pub fn peers(&self) -> Vec<CityName> {
        let mut peers: Vec<CityName> = self.shared.peers.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Stop accepting and tear down every connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Drop for NetworkPort {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn bind_with_search(addr: SocketAddr, span: u16) -> Result<TcpListener, TransportError> {
    if addr.port() == 0 {
        return Ok(TcpListener::bind(addr).await?);
    }
    let first = addr.port();
    let last = first.saturating_add(span);
    for port in first..=last {
        match TcpListener::bind(SocketAddr::new(addr.ip(), port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "port in use, trying the next one");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(TransportError::NoFreePort { first, last })
}

async fn accept_loop(listener: TcpListener, shared: Arc<PortShared>) {
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = establish(stream, shared, Role::Listener).await {
                            tracing::warn!(%peer_addr, error = %e, "rejected incoming connection");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

/// Handshake, register the link with the city, and spawn the I/O tasks.
async fn establish(
    stream: TcpStream,
    shared: Arc<PortShared>,
    role: Role,
) -> Result<CityName, TransportError> {
    let config = &shared.config;
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(config.max_record_bytes));

    let mut hello = Hello::new(shared.city.clone());
    if let Role::Dialer(direction) = role {
        hello = hello.with_direction(direction);
    }
    timeout(config.handshake_timeout(), lines.send(wire::encode_hello(&hello)?))
        .await
        .map_err(|_| TransportError::Timeout("sending hello"))??;
    let line = timeout(config.handshake_timeout(), lines.next())
        .await
        .map_err(|_| TransportError::Timeout("waiting for hello"))?
        .ok_or_else(|| TransportError::Handshake("peer closed before hello".into()))??;
    let peer = wire::decode_hello(&line)?;

    if peer.version != PROTOCOL_VERSION {
        return Err(TransportError::Handshake(format!(
            "unsupported protocol version {}",
            peer.version
        )));
    }
    let remote = peer.city;
    if remote == shared.city {
        return Err(LinkError::SelfLink(remote).into());
    }
    let halves = match (role, peer.direction) {
        (Role::Dialer(Direction::OneWay), _) => Halves {
            inbound: false,
            outbound: true,
        },
        (Role::Listener, Direction::OneWay) => Halves {
            inbound: true,
            outbound: false,
        },
        _ => Halves {
            inbound: true,
            outbound: true,
        },
    };
    if !shared.claim(&remote, halves) {
        return Err(LinkError::Duplicate {
            local: shared.city.clone(),
            remote,
        }
        .into());
    }

    let token = shared.shutdown.child_token();
    let capacity = config.queue_capacity.max(1);
    let (outbound, out_rx) = if halves.outbound {
        let (tx, rx) = mpsc::channel(capacity);
        let link = NetSender {
            id: LinkId::next(),
            remote: remote.clone(),
            tx,
            token: token.clone(),
        };
        (Some(link), Some(rx))
    } else {
        (None, None)
    };
    let (inbound, in_tx) = if halves.inbound {
        let (tx, rx) = mpsc::channel(capacity);
        let link = NetReceiver {
            id: LinkId::next(),
            remote: remote.clone(),
            rx,
            token: token.clone(),
        };
        (Some(link), Some(tx))
    } else {
        (None, None)
    };
    let inbound_id = inbound.as_ref().map(|l| l.id);
    let outbound_id = outbound.as_ref().map(|l| l.id);

    if let Err(e) = shared.registrar.connected(
        remote.clone(),
        inbound.map(|l| Box::new(l) as Box<dyn InboundLink>),
        outbound.map(|l| Box::new(l) as Box<dyn OutboundLink>),
    ) {
        shared.release(&remote, halves);
        return Err(e);
    }
    tracing::info!(
        city = %shared.city,
        remote = %remote,
        inbound = halves.inbound,
        outbound = halves.outbound,
        "link established"
    );

    let (sink, stream) = lines.split();
    let reader = tokio::spawn(read_loop(
        stream,
        in_tx,
        token.clone(),
        shared.registrar.clone(),
        remote.clone(),
    ));
    let writer = tokio::spawn(write_loop(sink, out_rx, token.clone()));

    let supervised = remote.clone();
    tokio::spawn(async move {
        let _ = reader.await;
        let unsent = writer.await.unwrap_or_default();
        token.cancel();
        shared.release(&supervised, halves);

        tracing::info!(
            city = %shared.city,
            remote = %supervised,
            returned = unsent.len(),
            "link closed"
        );
        if !unsent.is_empty() {
            let _ = shared.registrar.undelivered(supervised.clone(), unsent);
        }
        let _ = shared
            .registrar
            .disconnected(supervised, inbound_id, outbound_id);
    });

    Ok(remote)
}

/// Decode merchant lines into the inbound queue until EOF, error, or cancel.
/// Without an inbound queue (the dialing end of a one-way link) any merchant
/// line is a protocol error.
async fn read_loop(
    mut stream: SplitStream<Lines>,
    tx: Option<mpsc::Sender<Merchant>>,
    token: CancellationToken,
    registrar: LinkRegistrar,
    remote: CityName,
) {
    let city = registrar.city().clone();
    loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            line = stream.next() => line,
        };
        let merchant = match line {
            None => {
                tracing::debug!(%city, %remote, "peer closed the connection");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(%city, %remote, error = %e, "read failed");
                break;
            }
            Some(Ok(line)) => match wire::decode_merchant(&line, &city) {
                Ok(merchant) => merchant,
                Err(e) => {
                    tracing::warn!(%city, %remote, error = %e, "malformed merchant record");
                    break;
                }
            },
        };
        let Some(tx) = &tx else {
            tracing::warn!(%city, %remote, "merchant sent the wrong way down a one-way link");
            hand_over(&registrar, &remote, merchant);
            break;
        };
        // Waiting here stops reading the socket while the city is backed up.
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = tx.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => permit.send(merchant),
            None => {
                hand_over(&registrar, &remote, merchant);
                break;
            }
        }
    }
    token.cancel();
}

/// Give a merchant already off the wire to the city directly.
fn hand_over(registrar: &LinkRegistrar, remote: &CityName, merchant: Merchant) {
    if let Err(e) = registrar.delivered(remote.clone(), merchant) {
        tracing::warn!(city = %registrar.city(), %remote, error = %e, "arriving merchant lost");
    }
}

/// Write queued merchants one line at a time, flushing each. Returns the
/// merchants that never reached the socket.
async fn write_loop(
    mut sink: SplitSink<Lines, String>,
    rx: Option<mpsc::Receiver<Merchant>>,
    token: CancellationToken,
) -> Vec<Merchant> {
    let Some(mut rx) = rx else {
        token.cancelled().await;
        return Vec::new();
    };
    let mut unsent = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = rx.recv() => next,
        };
        let Some(merchant) = next else {
            break;
        };
        let line = match wire::encode_merchant(&merchant) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode merchant");
                unsent.push(merchant);
                continue;
            }
        };
        // The buffer is empty after every flush, so a failed feed wrote nothing.
        if let Err(e) = sink.feed(line).await {
            tracing::warn!(error = %e, "write failed");
            unsent.push(merchant);
            break;
        }
        // A failed flush may already have put the line on the wire, so the
        // merchant is not handed back.
        if let Err(e) = sink.flush().await {
            tracing::warn!(error = %e, money = merchant.money, "flush failed, merchant in doubt");
            break;
        }
    }
    token.cancel();
    rx.close();
    while let Ok(merchant) = rx.try_recv() {
        unsent.push(merchant);
    }
    unsent
}
