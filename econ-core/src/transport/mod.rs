//! Links that carry merchants between cities.
//!
//! A link is one direction; a two-way connection is an inbound and an outbound
//! link to the same remote city. Both backends ([`queue`] in-process,
//! [`network`] over TCP) sit behind [`OutboundLink`] and [`InboundLink`], and a
//! [`City`](crate::city::City) never knows which one it holds.
//!
//! Backpressure contract: `try_send` never blocks. When the link is full or
//! closed the merchant comes back inside the [`SendError`] and the caller keeps
//! it.

pub mod network;
pub mod queue;
pub mod wire;

pub use network::*;
pub use queue::*;
pub use wire::*;

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;

use crate::agents::Merchant;
use crate::error::TransportError;
use crate::types::CityName;

// ============================================================================
// Link identity
// ============================================================================

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id, so a stale teardown never removes a newer link to the
/// same remote city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u64);

impl LinkId {
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

// ============================================================================
// Contract
// ============================================================================

/// Refused send. The merchant is handed back untouched.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("link is full")]
    Full(Merchant),
    #[error("link is closed")]
    Closed(Merchant),
}

impl SendError {
    pub fn into_merchant(self) -> Merchant {
        match self {
            SendError::Full(m) | SendError::Closed(m) => m,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::Closed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("link closed")]
pub struct LinkClosed;

pub trait OutboundLink: Send {
    fn id(&self) -> LinkId;

    /// City at the far end.
    fn remote(&self) -> &CityName;

    fn try_send(&self, merchant: Merchant) -> Result<(), SendError>;

    /// Closed by either end. Nothing sent from now on will arrive.
    fn is_closed(&self) -> bool;

    fn close(&self);
}

pub trait InboundLink: Send {
    fn id(&self) -> LinkId;

    /// City at the far end.
    fn remote(&self) -> &CityName;

    /// Next waiting merchant, if any. Errors once the link is closed and
    /// drained.
    fn try_receive(&mut self) -> Result<Option<Merchant>, LinkClosed>;

    fn close(&self);
}

// ============================================================================
// Hand-off into the owning city
// ============================================================================

/// Changes to a city's links, produced off the tick thread and applied by the
/// city at the start of its next tick. A one-way connection carries only one
/// of the two halves.
pub enum LinkEvent {
    Connected {
        remote: CityName,
        inbound: Option<Box<dyn InboundLink>>,
        outbound: Option<Box<dyn OutboundLink>>,
    },
    Disconnected {
        remote: CityName,
        inbound: Option<LinkId>,
        outbound: Option<LinkId>,
    },
    /// A merchant read off the wire after its link stopped taking arrivals.
    Delivered { remote: CityName, merchant: Merchant },
    /// Merchants still queued on a link that went down.
    Undelivered {
        remote: CityName,
        merchants: Vec<Merchant>,
    },
}

impl std::fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkEvent::Connected {
                remote,
                inbound,
                outbound,
            } => f
                .debug_struct("Connected")
                .field("remote", remote)
                .field("inbound", &inbound.as_ref().map(|l| l.id()))
                .field("outbound", &outbound.as_ref().map(|l| l.id()))
                .finish(),
            LinkEvent::Disconnected {
                remote,
                inbound,
                outbound,
            } => f
                .debug_struct("Disconnected")
                .field("remote", remote)
                .field("inbound", inbound)
                .field("outbound", outbound)
                .finish(),
            LinkEvent::Delivered { remote, merchant } => f
                .debug_struct("Delivered")
                .field("remote", remote)
                .field("money", &merchant.money)
                .finish(),
            LinkEvent::Undelivered { remote, merchants } => f
                .debug_struct("Undelivered")
                .field("remote", remote)
                .field("merchants", &merchants.len())
                .finish(),
        }
    }
}

/// Cloneable handle other threads use to hand links and merchants to a city.
#[derive(Debug, Clone)]
pub struct LinkRegistrar {
    city: CityName,
    events: Sender<LinkEvent>,
}

impl LinkRegistrar {
    pub fn new(city: CityName, events: Sender<LinkEvent>) -> Self {
        Self { city, events }
    }

    /// Name of the city this registrar feeds.
    pub fn city(&self) -> &CityName {
        &self.city
    }

    pub fn connected(
        &self,
        remote: CityName,
        inbound: Option<Box<dyn InboundLink>>,
        outbound: Option<Box<dyn OutboundLink>>,
    ) -> Result<(), TransportError> {
        self.send(LinkEvent::Connected {
            remote,
            inbound,
            outbound,
        })
    }

    pub fn disconnected(
        &self,
        remote: CityName,
        inbound: Option<LinkId>,
        outbound: Option<LinkId>,
    ) -> Result<(), TransportError> {
        self.send(LinkEvent::Disconnected {
            remote,
            inbound,
            outbound,
        })
    }

    pub fn delivered(&self, remote: CityName, merchant: Merchant) -> Result<(), TransportError> {
        self.send(LinkEvent::Delivered { remote, merchant })
    }

    pub fn undelivered(
        &self,
        remote: CityName,
        merchants: Vec<Merchant>,
    ) -> Result<(), TransportError> {
        self.send(LinkEvent::Undelivered { remote, merchants })
    }

    fn send(&self, event: LinkEvent) -> Result<(), TransportError> {
        self.events.send(event).map_err(|_| TransportError::CityGone)
    }
}
