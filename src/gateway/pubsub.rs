// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Implementation of publish/subscriber protocol for block updates.
//!
//! For every delivered block the valid transactions are reduced to a map of
//! transaction id to invoked function name, and the map is handed to every
//! subscriber. Blocks without relevant transactions are not announced.
//!
//! Subscribers are either callbacks, invoked on the delivery thread, or
//! channels. If a channel subscriber closes the receiving side, this is
//! interpreted as an implicit unsubscribe.
//!
//! Channel subscriptions hold at most `CHANNEL_BOUND` undelivered updates.
//! A subscriber lagging behind that bound is never fed a partial sequence:
//! the bus closes its channel and drops the subscription. The receiver still
//! gets the queued updates, then observes the channel closed and must
//! subscribe again.

use super::{commit::CommitTracker, BlockListener};
use crate::{
    base::{BlockEvent, FunctionMap, RwLock},
    channel::{self, ChannelError, Receiver, Sender},
    Error, ErrorKind, Result,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

#[cfg(test)]
use mockall::automock;

/// Block updates consumer.
#[cfg_attr(test, automock)]
pub trait BlockUpdateListener: Send + Sync {
    /// Called on the delivery thread, keep it short.
    fn block_update_received(&self, update: &FunctionMap) -> Result<()>;
}

#[derive(Clone)]
enum Subscriber {
    Callback(Arc<dyn BlockUpdateListener>),
    Channel(Sender<FunctionMap>),
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        match self {
            Subscriber::Callback(_) => false,
            Subscriber::Channel(chan) => chan.is_closed(),
        }
    }

    fn notify(&self, update: &FunctionMap) -> Result<()> {
        match self {
            Subscriber::Callback(listener) => {
                panic::catch_unwind(AssertUnwindSafe(|| listener.block_update_received(update)))
                    .unwrap_or_else(|_| {
                        Err(Error::new_ext(ErrorKind::ListenerFault, "listener panicked"))
                    })
            }
            Subscriber::Channel(chan) => chan.try_send(update.clone()).map_err(|err| match err {
                ChannelError::Full => {
                    chan.close();
                    Error::new_ext(
                        ErrorKind::ListenerFault,
                        "subscriber lagging, channel closed",
                    )
                }
                ChannelError::SendError => Error::new_ext(ErrorKind::ListenerFault, "channel closed"),
                err => Error::new_ext(ErrorKind::ListenerFault, err),
            }),
        }
    }

    fn is_listener(&self, addr: *const ()) -> bool {
        match self {
            Subscriber::Callback(listener) => Arc::as_ptr(listener).cast::<()>() == addr,
            Subscriber::Channel(_) => false,
        }
    }
}

/// Block notifications fan-out.
#[derive(Default)]
pub struct BlockEventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    /// Resolved before subscribers are notified.
    tracker: Option<Arc<CommitTracker>>,
}

impl BlockEventBus {
    pub fn new() -> Self {
        BlockEventBus::default()
    }

    /// Bus forwarding every transaction outcome to `tracker`.
    pub fn with_commit_tracker(tracker: Arc<CommitTracker>) -> Self {
        BlockEventBus {
            subscribers: RwLock::new(Vec::new()),
            tracker: Some(tracker),
        }
    }

    /// Subscribe to block updates.
    /// Returns false if the listener was already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn BlockUpdateListener>) -> bool {
        let addr = Arc::as_ptr(&listener).cast::<()>();
        let mut subscribers = self.subscribers.write();
        if subscribers.iter().any(|sub| sub.is_listener(addr)) {
            return false;
        }
        subscribers.push(Subscriber::Callback(listener));
        debug!("[sub] listener subscribed ({} subscribers)", subscribers.len());
        true
    }

    /// Subscribe to block updates through a channel.
    /// Dropping or closing the receiver unsubscribes.
    pub fn subscribe_channel(&self) -> Receiver<FunctionMap> {
        let (sender, receiver) = channel::simple_channel();
        let mut subscribers = self.subscribers.write();
        subscribers.push(Subscriber::Channel(sender));
        debug!("[sub] channel subscribed ({} subscribers)", subscribers.len());
        receiver
    }

    /// Unsubscribe from block updates.
    /// Returns false if the listener was not subscribed.
    pub fn unsubscribe<L>(&self, listener: &Arc<L>) -> bool
    where
        L: BlockUpdateListener + ?Sized,
    {
        let addr = Arc::as_ptr(listener).cast::<()>();
        let mut subscribers = self.subscribers.write();
        let count = subscribers.len();
        subscribers.retain(|sub| !sub.is_listener(addr));
        let removed = subscribers.len() != count;
        if removed {
            debug!("[sub] listener unsubscribed ({} subscribers)", subscribers.len());
        }
        removed
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Process a delivered block.
    /// Returns the number of subscribers successfully notified.
    pub fn on_block(&self, block: &BlockEvent) -> usize {
        if let Some(tracker) = &self.tracker {
            tracker.on_block(block);
        }
        let update = function_map(block);
        if update.is_empty() {
            return 0;
        }
        debug!(
            "[sub] block {} carries {} valid transactions",
            block.number,
            update.len()
        );
        self.announce(&update)
    }

    fn announce(&self, update: &FunctionMap) -> usize {
        // Listeners run without holding the lock.
        let snapshot = self.subscribers.read().clone();
        let mut notified = 0;
        let mut closed = false;
        for sub in snapshot.iter() {
            if sub.is_closed() {
                closed = true;
                continue;
            }
            match sub.notify(update) {
                Ok(()) => notified += 1,
                Err(err) => {
                    warn!("[sub] block update dropped: {}", err.to_string_full());
                    closed |= sub.is_closed();
                }
            }
        }
        if closed {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|sub| !sub.is_closed());
            debug!(
                "[sub] removed closed channels ({} subscribers)",
                subscribers.len()
            );
        }
        notified
    }
}

impl BlockListener for BlockEventBus {
    fn received(&self, block: &BlockEvent) {
        self.on_block(block);
    }
}

/// Map every valid transaction of `block` to the invoked function name.
pub fn function_map(block: &BlockEvent) -> FunctionMap {
    block
        .transactions
        .iter()
        .filter(|tx| tx.is_valid())
        .filter_map(|tx| tx.function_name().map(|name| (tx.tx_id.clone(), name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{
            schema::tests::{create_test_block, create_test_tx_event},
            Mutex, TransactionId,
        },
        channel::CHANNEL_BOUND,
    };
    use std::{thread, time::Duration};

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id)
    }

    fn create_test_update_block() -> BlockEvent {
        create_test_block(
            3,
            vec![
                create_test_tx_event("tx1", true, &["createCar", "CAR11", "Skoda"]),
                create_test_tx_event("tx2", false, &["changeCarOwner", "CAR4", "Dave"]),
                create_test_tx_event("tx3", true, &["changeCarOwner", "CAR5", "Lukas"]),
            ],
        )
    }

    fn expected_update() -> FunctionMap {
        let mut update = FunctionMap::new();
        update.insert(tx("tx1"), "createCar".to_string());
        update.insert(tx("tx3"), "changeCarOwner".to_string());
        update
    }

    fn expecting_listener(times: usize) -> Arc<MockBlockUpdateListener> {
        let mut listener = MockBlockUpdateListener::new();
        listener
            .expect_block_update_received()
            .times(times)
            .withf(|update| *update == expected_update())
            .returning(|_| Ok(()));
        Arc::new(listener)
    }

    struct PanickingListener;

    impl BlockUpdateListener for PanickingListener {
        fn block_update_received(&self, _update: &FunctionMap) -> Result<()> {
            panic!("listener bug");
        }
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<FunctionMap>>,
    }

    impl BlockUpdateListener for Recorder {
        fn block_update_received(&self, update: &FunctionMap) -> Result<()> {
            self.updates.lock().push(update.clone());
            Ok(())
        }
    }

    #[test]
    fn function_map_skips_invalid() {
        let update = function_map(&create_test_update_block());

        assert_eq!(update, expected_update());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let bus = BlockEventBus::new();
        let listener = Arc::new(Recorder::default());

        assert!(bus.subscribe(listener.clone()));
        assert!(!bus.subscribe(listener.clone()));
        assert_eq!(bus.subscribers(), 1);
    }

    #[test]
    fn unsubscribe_non_member() {
        let bus = BlockEventBus::new();
        let member = Arc::new(Recorder::default());
        let stranger = Arc::new(Recorder::default());
        bus.subscribe(member.clone());

        assert!(!bus.unsubscribe(&stranger));
        assert!(bus.unsubscribe(&member));
        assert!(!bus.unsubscribe(&member));
        assert_eq!(bus.subscribers(), 0);
    }

    #[test]
    fn every_subscriber_notified_once() {
        let bus = BlockEventBus::new();
        let listener1 = expecting_listener(1);
        let listener2 = expecting_listener(1);
        bus.subscribe(listener1.clone());
        bus.subscribe(listener2.clone());
        bus.subscribe(listener2.clone());

        let notified = bus.on_block(&create_test_update_block());

        assert_eq!(notified, 2);
    }

    #[test]
    fn all_invalid_block_not_announced() {
        let bus = BlockEventBus::new();
        bus.subscribe(expecting_listener(0));
        let block = create_test_block(
            4,
            vec![
                create_test_tx_event("tx1", false, &["createCar"]),
                create_test_tx_event("tx2", false, &["createCar"]),
            ],
        );

        assert_eq!(bus.on_block(&block), 0);
    }

    #[test]
    fn empty_block_not_announced() {
        let bus = BlockEventBus::new();
        bus.subscribe(expecting_listener(0));

        assert_eq!(bus.on_block(&create_test_block(5, vec![])), 0);
    }

    #[test]
    fn unsubscribed_listener_not_notified() {
        let bus = BlockEventBus::new();
        let listener = expecting_listener(0);
        bus.subscribe(listener.clone());
        bus.unsubscribe(&listener);

        assert_eq!(bus.on_block(&create_test_update_block()), 0);
    }

    #[test]
    fn failing_listeners_are_isolated() {
        let bus = BlockEventBus::new();
        let mut failing = MockBlockUpdateListener::new();
        failing
            .expect_block_update_received()
            .times(1)
            .returning(|_| Err(Error::new_ext(ErrorKind::Other, "adapter down")));
        bus.subscribe(Arc::new(failing));
        bus.subscribe(Arc::new(PanickingListener));
        let healthy = Arc::new(Recorder::default());
        bus.subscribe(healthy.clone());

        let notified = bus.on_block(&create_test_update_block());

        assert_eq!(notified, 1);
        assert_eq!(*healthy.updates.lock(), vec![expected_update()]);
    }

    #[test]
    fn channel_subscriber() {
        let bus = BlockEventBus::new();
        let receiver = bus.subscribe_channel();

        bus.on_block(&create_test_update_block());
        let update = receiver.recv_timeout_sync(Duration::from_secs(1)).unwrap();

        assert_eq!(update, expected_update());
    }

    #[test]
    fn closed_channel_lazily_removed() {
        let bus = BlockEventBus::new();
        let receiver = bus.subscribe_channel();
        bus.subscribe(Arc::new(Recorder::default()));
        drop(receiver);
        assert_eq!(bus.subscribers(), 2);

        let notified = bus.on_block(&create_test_update_block());

        assert_eq!(notified, 1);
        assert_eq!(bus.subscribers(), 1);
    }

    #[test]
    fn lagging_channel_dropped() {
        let bus = BlockEventBus::new();
        let receiver = bus.subscribe_channel();
        let block = create_test_update_block();

        let notified: usize = (0..CHANNEL_BOUND + 5).map(|_| bus.on_block(&block)).sum();

        assert_eq!(notified, CHANNEL_BOUND);
        assert_eq!(bus.subscribers(), 0);
        let mut received = 0;
        while let Ok(update) = receiver.recv_sync() {
            assert_eq!(update, expected_update());
            received += 1;
        }
        assert_eq!(received, CHANNEL_BOUND);
        assert!(receiver.is_closed());
    }

    #[test]
    fn commits_resolved_before_fan_out() {
        let tracker = Arc::new(CommitTracker::new());
        let mut fut = tracker.track(tx("tx2")).unwrap();
        let bus = BlockEventBus::with_commit_tracker(tracker.clone());

        bus.received(&create_test_update_block());

        // Invalid transactions still resolve their waiter.
        let event = fut.wait_sync(Duration::from_secs(1)).unwrap();
        assert!(!event.is_valid());
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn concurrent_subscribe_and_delivery() {
        let bus = Arc::new(BlockEventBus::new());
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());

        let bus_clone = bus.clone();
        let handle = thread::spawn(move || {
            for _ in 0..100 {
                let listener: Arc<dyn BlockUpdateListener> = Arc::new(Recorder::default());
                bus_clone.subscribe(listener.clone());
                bus_clone.unsubscribe(&listener);
            }
        });
        for _ in 0..100 {
            bus.on_block(&create_test_update_block());
        }
        handle.join().unwrap();

        assert_eq!(recorder.updates.lock().len(), 100);
        assert_eq!(bus.subscribers(), 1);
    }
}
