//! In-process link: a bounded crossbeam channel shared by two cities in the
//! same runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::agents::Merchant;
use crate::transport::{InboundLink, LinkClosed, LinkId, OutboundLink, SendError};
use crate::types::CityName;

/// Sending half, held by the origin city.
#[derive(Debug)]
pub struct QueueSender {
    id: LinkId,
    remote: CityName,
    tx: Sender<Merchant>,
    closed: Arc<AtomicBool>,
}

/// Receiving half, held by the destination city.
#[derive(Debug)]
pub struct QueueReceiver {
    id: LinkId,
    remote: CityName,
    rx: Receiver<Merchant>,
    closed: Arc<AtomicBool>,
}

/// One-way link from `from` to `to` holding at most `capacity` merchants.
pub fn queue_link(from: CityName, to: CityName, capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let id = LinkId::next();
    let closed = Arc::new(AtomicBool::new(false));
    (
        QueueSender {
            id,
            remote: to,
            tx,
            closed: closed.clone(),
        },
        QueueReceiver {
            id,
            remote: from,
            rx,
            closed,
        },
    )
}

impl QueueSender {
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl OutboundLink for QueueSender {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &CityName {
        &self.remote
    }

    fn try_send(&self, merchant: Merchant) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(merchant));
        }
        match self.tx.try_send(merchant) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(m)) => Err(SendError::Full(m)),
            Err(TrySendError::Disconnected(m)) => Err(SendError::Closed(m)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl InboundLink for QueueReceiver {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &CityName {
        &self.remote
    }

    /// Merchants already queued are still delivered after a close.
    fn try_receive(&mut self) -> Result<Option<Merchant>, LinkClosed> {
        match self.rx.try_recv() {
            Ok(merchant) => Ok(Some(merchant)),
            Err(TryRecvError::Empty) if self.closed.load(Ordering::Acquire) => Err(LinkClosed),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(LinkClosed),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
