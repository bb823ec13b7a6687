// offchain/spm_client/src/store.rs
//! Eventually-consistent local views of program state.
//!
//! A [`Resource`] only accepts the result of its most recent fetch for its current key, so
//! a slow request can never overwrite newer data and a result for an address the view has
//! moved away from is discarded. Failed fetches keep the last good value.
//! Feeds tie a resource to a live-channel subscription and publish over `tokio::sync::watch`.

use std::sync::{Arc, Mutex, MutexGuard};

use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::{AccountSource, ProgramReader};
use crate::live::LiveChannel;
use crate::types::{Argument, Bet, Market};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------- Resource ----------

/// Proof of which fetch a result belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    key: K,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: Option<T>,
    pub error: Option<String>,
    pub loading: bool,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
            loading: false,
        }
    }
}

#[derive(Debug)]
pub struct Resource<K, T> {
    key: Option<K>,
    seq: u64,
    value: Option<T>,
    error: Option<String>,
    loading: bool,
}

impl<K, T> Default for Resource<K, T> {
    fn default() -> Self {
        Self {
            key: None,
            seq: 0,
            value: None,
            error: None,
            loading: false,
        }
    }
}

impl<K: Clone + PartialEq, T: Clone> Resource<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fetch for `key`. Switching keys drops the old key's data.
    pub fn begin(&mut self, key: K) -> Ticket<K> {
        if self.key.as_ref() != Some(&key) {
            self.key = Some(key.clone());
            self.value = None;
            self.error = None;
        }
        self.seq += 1;
        self.loading = true;
        Ticket { key, seq: self.seq }
    }

    /// Applies a result if its ticket is still current. Returns whether it was applied.
    pub fn apply<E: std::fmt::Display>(&mut self, ticket: Ticket<K>, result: Result<T, E>) -> bool {
        if self.key.as_ref() != Some(&ticket.key) || ticket.seq != self.seq {
            return false;
        }
        self.loading = false;
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
        true
    }

    /// Forgets the key and its data. Every outstanding ticket goes stale.
    pub fn reset(&mut self) {
        self.key = None;
        self.seq += 1;
        self.value = None;
        self.error = None;
        self.loading = false;
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            value: self.value.clone(),
            error: self.error.clone(),
            loading: self.loading,
        }
    }
}

// ---------- Refresh gate ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Running,
    Dirty,
}

/// Collapses a burst of invalidations into one running refresh plus at most one trailing one.
#[derive(Debug)]
pub struct RefreshGate {
    state: Mutex<GateState>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the caller should run a refresh now. Otherwise the running one is marked dirty.
    pub fn try_begin(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            GateState::Idle => {
                *state = GateState::Running;
                true
            }
            GateState::Running | GateState::Dirty => {
                *state = GateState::Dirty;
                false
            }
        }
    }

    /// True if an invalidation arrived meanwhile and the caller must refresh again.
    pub fn finish(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            GateState::Dirty => {
                *state = GateState::Running;
                true
            }
            GateState::Running | GateState::Idle => {
                *state = GateState::Idle;
                false
            }
        }
    }
}

// ---------- Feeds ----------

struct FeedState<K, T> {
    resource: Mutex<Resource<K, T>>,
    gate: RefreshGate,
    tx: watch::Sender<Snapshot<T>>,
}

impl<K: Clone + PartialEq, T: Clone> FeedState<K, T> {
    fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            resource: Mutex::new(Resource::new()),
            gate: RefreshGate::new(),
            tx,
        }
    }

    fn begin(&self, key: K) -> Ticket<K> {
        let mut res = lock(&self.resource);
        let ticket = res.begin(key);
        self.tx.send_replace(res.snapshot());
        ticket
    }

    fn reset(&self) {
        let mut res = lock(&self.resource);
        res.reset();
        self.tx.send_replace(res.snapshot());
    }

    fn finish(&self, ticket: Ticket<K>, result: Result<T, FetchError>) {
        let mut res = lock(&self.resource);
        if let Err(e) = &result {
            warn!(%e, "refresh failed, keeping last good data");
        }
        if res.apply(ticket, result) {
            self.tx.send_replace(res.snapshot());
        } else {
            debug!("discarding superseded refresh");
        }
    }
}

pub const MARKETS_KEY: &str = "program-markets";

pub fn market_key(address: &Pubkey) -> String {
    format!("market-{address}")
}

/// All markets, re-fetched whenever any program account changes.
pub struct MarketsFeed<S> {
    reader: Arc<ProgramReader<S>>,
    state: Arc<FeedState<(), Vec<Market>>>,
}

impl<S> Clone for MarketsFeed<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: AccountSource + 'static> MarketsFeed<S> {
    pub fn new(reader: Arc<ProgramReader<S>>) -> Self {
        Self {
            reader,
            state: Arc::new(FeedState::new()),
        }
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<Vec<Market>>> {
        self.state.tx.subscribe()
    }

    pub fn current(&self) -> Snapshot<Vec<Market>> {
        self.state.tx.borrow().clone()
    }

    pub async fn refresh(&self) {
        let ticket = self.state.begin(());
        let result = self.reader.fetch_markets().await;
        self.state.finish(ticket, result);
    }

    /// Refresh unless one is already running, in which case it is re-run once afterwards.
    pub async fn refresh_coalesced(&self) {
        if !self.state.gate.try_begin() {
            return;
        }
        loop {
            self.refresh().await;
            if !self.state.gate.finish() {
                break;
            }
        }
    }

    pub fn attach(&self, channel: &LiveChannel) {
        let feed = self.clone();
        channel.subscribe_program(MARKETS_KEY, &self.reader.program_id(), move |_| {
            let feed = feed.clone();
            tokio::spawn(async move { feed.refresh_coalesced().await });
        });
    }

    pub fn detach(&self, channel: &LiveChannel) {
        channel.unsubscribe(MARKETS_KEY);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDetail {
    pub market: Market,
    pub bets: Vec<Bet>,
    pub arguments: Vec<Argument>,
}

/// One market with its bets and arguments, re-fetched when the market account changes.
pub struct MarketDetailFeed<S> {
    reader: Arc<ProgramReader<S>>,
    state: Arc<FeedState<Pubkey, MarketDetail>>,
    focus: Arc<Mutex<Option<Pubkey>>>,
}

impl<S> Clone for MarketDetailFeed<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            state: self.state.clone(),
            focus: self.focus.clone(),
        }
    }
}

impl<S: AccountSource + 'static> MarketDetailFeed<S> {
    pub fn new(reader: Arc<ProgramReader<S>>) -> Self {
        Self {
            reader,
            state: Arc::new(FeedState::new()),
            focus: Arc::new(Mutex::new(None)),
        }
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<MarketDetail>> {
        self.state.tx.subscribe()
    }

    pub fn current(&self) -> Snapshot<MarketDetail> {
        self.state.tx.borrow().clone()
    }

    pub fn focused(&self) -> Option<Pubkey> {
        *lock(&self.focus)
    }

    async fn load(&self, address: Pubkey) -> Result<MarketDetail, FetchError> {
        let (market, bets, arguments) = tokio::try_join!(
            self.reader.fetch_market(&address),
            self.reader.fetch_market_bets(&address),
            self.reader.fetch_market_arguments(&address),
        )?;
        let market = market.ok_or_else(|| FetchError::NotFound(address.to_string()))?;
        Ok(MarketDetail {
            market,
            bets,
            arguments,
        })
    }

    /// Re-fetches the focused market, if any.
    pub async fn refresh(&self) {
        let Some(address) = self.focused() else {
            return;
        };
        let ticket = self.state.begin(address);
        let result = self.load(address).await;
        self.state.finish(ticket, result);
    }

    pub async fn refresh_coalesced(&self) {
        if !self.state.gate.try_begin() {
            return;
        }
        loop {
            self.refresh().await;
            if !self.state.gate.finish() {
                break;
            }
        }
    }

    /// Switches to `address`: moves the account subscription and loads the new market.
    pub async fn focus(&self, channel: &LiveChannel, address: Pubkey) {
        let previous = lock(&self.focus).replace(address);
        if let Some(prev) = previous.filter(|p| *p != address) {
            channel.unsubscribe(&market_key(&prev));
        }

        let feed = self.clone();
        channel.subscribe_account(&market_key(&address), &address, move |_| {
            let feed = feed.clone();
            tokio::spawn(async move { feed.refresh_coalesced().await });
        });
        self.refresh().await;
    }

    /// Drops the focus and its data. A load still in flight is discarded when it lands.
    pub fn release(&self, channel: &LiveChannel) {
        if let Some(prev) = lock(&self.focus).take() {
            channel.unsubscribe(&market_key(&prev));
        }
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::fixtures;
    use crate::config::ChannelConfig;
    use crate::fetch::{AccountFilter, RawAccount};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Program queries take `delay_ms` (10 ms unless set).
    #[derive(Default)]
    struct FakeSource {
        accounts: Mutex<Vec<RawAccount>>,
        calls: AtomicUsize,
        failing: AtomicBool,
        delay_ms: AtomicU64,
    }

    impl FakeSource {
        fn set_delay(&self, ms: u64) {
            self.delay_ms.store(ms, Ordering::SeqCst);
        }

        fn delay(&self) -> Duration {
            match self.delay_ms.load(Ordering::SeqCst) {
                0 => Duration::from_millis(10),
                ms => Duration::from_millis(ms),
            }
        }
    }

    #[async_trait]
    impl AccountSource for FakeSource {
        async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError> {
            Ok(lock(&self.accounts)
                .iter()
                .find(|a| a.address == *address)
                .map(|a| a.data.clone()))
        }

        async fn get_multiple_accounts(
            &self,
            addresses: &[Pubkey],
        ) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
            let mut out = Vec::new();
            for a in addresses {
                out.push(self.get_account(a).await?);
            }
            Ok(out)
        }

        async fn get_program_accounts(
            &self,
            _program_id: &Pubkey,
            filters: &[AccountFilter],
        ) -> Result<Vec<RawAccount>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay()).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Rpc("connection refused".into()));
            }
            Ok(lock(&self.accounts)
                .iter()
                .filter(|a| filters.iter().all(|f| f.matches(&a.data)))
                .cloned()
                .collect())
        }
    }

    fn feed_with(markets: &[Market]) -> (MarketsFeed<FakeSource>, Arc<ProgramReader<FakeSource>>) {
        let source = FakeSource::default();
        *lock(&source.accounts) = markets
            .iter()
            .map(|m| RawAccount {
                address: m.address,
                data: fixtures::market_bytes(m),
            })
            .collect();
        let reader = Arc::new(ProgramReader::new(source, Pubkey::new_unique()));
        (MarketsFeed::new(reader.clone()), reader)
    }

    fn raw_market(m: &Market) -> RawAccount {
        RawAccount {
            address: m.address,
            data: fixtures::market_bytes(m),
        }
    }

    type DetailFixture = (
        MarketDetailFeed<FakeSource>,
        Arc<ProgramReader<FakeSource>>,
        LiveChannel,
        Market,
        Market,
    );

    /// Two markets, one argument on the first. The channel is never started.
    fn detail_feed() -> DetailFixture {
        let a = fixtures::market("a");
        let b = fixtures::market("b");
        let arg = fixtures::argument(&a.address, "pools are thin");
        let source = FakeSource::default();
        *lock(&source.accounts) = vec![
            raw_market(&a),
            raw_market(&b),
            RawAccount {
                address: arg.address,
                data: fixtures::argument_bytes(&arg),
            },
        ];
        let reader = Arc::new(ProgramReader::new(source, Pubkey::new_unique()));
        let channel = LiveChannel::new(ChannelConfig::new("ws://127.0.0.1:9"));
        (MarketDetailFeed::new(reader.clone()), reader, channel, a, b)
    }

    fn detail_title(snap: &Snapshot<MarketDetail>) -> Option<&str> {
        snap.value.as_ref().map(|d| d.market.title.as_str())
    }

    #[test]
    fn stale_ticket_is_discarded() {
        let mut r: Resource<&str, u32> = Resource::new();
        let slow = r.begin("k");
        let fast = r.begin("k");
        assert!(r.apply(fast, Ok::<_, String>(2)));
        assert!(!r.apply(slow, Ok::<_, String>(1)));
        assert_eq!(r.value(), Some(&2));
        assert!(!r.is_loading());
    }

    #[test]
    fn result_for_old_key_is_discarded() {
        let mut r: Resource<&str, u32> = Resource::new();
        let old = r.begin("a");
        let _new = r.begin("b");
        assert!(!r.apply(old, Ok::<_, String>(1)));
        assert_eq!(r.value(), None);
        assert_eq!(r.key(), Some(&"b"));
    }

    #[test]
    fn error_keeps_last_good_value() {
        let mut r: Resource<(), Vec<u32>> = Resource::new();
        let t = r.begin(());
        r.apply(t, Ok::<_, String>(vec![1, 2]));
        let t = r.begin(());
        r.apply(t, Err("rpc down"));
        assert_eq!(r.value(), Some(&vec![1, 2]));
        assert_eq!(r.error(), Some("rpc down"));

        let t = r.begin(());
        r.apply(t, Ok::<_, String>(vec![3]));
        assert_eq!(r.error(), None);
    }

    #[test]
    fn reset_invalidates_outstanding_tickets() {
        let mut r: Resource<&str, u32> = Resource::new();
        let t = r.begin("k");
        r.apply(t, Ok::<_, String>(1));
        let inflight = r.begin("k");
        r.reset();
        assert!(!r.apply(inflight, Ok::<_, String>(2)));
        assert_eq!(r.key(), None);
        assert_eq!(r.value(), None);
        assert!(!r.is_loading());
    }

    #[test]
    fn gate_allows_one_trailing_run() {
        let g = RefreshGate::new();
        assert!(g.try_begin());
        assert!(!g.try_begin());
        assert!(!g.try_begin());
        assert!(g.finish()); // dirty -> run again
        assert!(!g.finish());
        assert!(g.try_begin());
    }

    #[tokio::test]
    async fn markets_feed_publishes_and_survives_failure() {
        let (feed, reader) = feed_with(&[fixtures::market("a"), fixtures::market("b")]);
        let mut rx = feed.watch();

        feed.refresh().await;
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.value.map(|v| v.len()), Some(2));
        assert!(!snap.loading);

        reader.source().failing.store(true, Ordering::SeqCst);
        feed.refresh().await;
        let snap = feed.current();
        assert_eq!(snap.value.map(|v| v.len()), Some(2));
        assert!(snap.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn notification_storm_coalesces() {
        let (feed, reader) = feed_with(&[fixtures::market("a")]);
        futures::future::join_all((0..5).map(|_| feed.refresh_coalesced())).await;
        assert_eq!(reader.source().calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.current().value.map(|v| v.len()), Some(1));
    }

    #[tokio::test]
    async fn detail_focus_loads_market_with_arguments() {
        let (feed, _, channel, a, _) = detail_feed();
        feed.focus(&channel, a.address).await;

        let snap = feed.current();
        let detail = snap.value.unwrap();
        assert_eq!(detail.market, a);
        assert!(detail.bets.is_empty());
        assert_eq!(detail.arguments.len(), 1);
        assert_eq!(detail.arguments[0].content, "pools are thin");
        assert_eq!(feed.focused(), Some(a.address));
    }

    #[tokio::test]
    async fn detail_focus_switch_drops_the_late_result() {
        let (feed, reader, channel, a, b) = detail_feed();
        let mut rx = feed.watch();

        reader.source().set_delay(60);
        let first = a.address;
        let slow = {
            let (feed, channel) = (feed.clone(), channel.clone());
            tokio::spawn(async move { feed.focus(&channel, first).await })
        };
        sleep(Duration::from_millis(5)).await;

        reader.source().set_delay(1);
        feed.focus(&channel, b.address).await;
        assert_eq!(detail_title(&rx.borrow_and_update()), Some("b"));

        slow.await.unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(detail_title(&feed.current()), Some("b"));
        assert!(!channel.unsubscribe(&market_key(&first)));
        assert!(channel.unsubscribe(&market_key(&b.address)));
    }

    #[tokio::test]
    async fn detail_release_discards_inflight_load() {
        let (feed, reader, channel, a, _) = detail_feed();
        feed.focus(&channel, a.address).await;
        let mut rx = feed.watch();

        reader.source().set_delay(40);
        let inflight = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.refresh().await })
        };
        sleep(Duration::from_millis(5)).await;
        feed.release(&channel);

        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap, Snapshot::default());
        inflight.await.unwrap();

        assert!(!rx.has_changed().unwrap());
        assert_eq!(feed.current(), Snapshot::default());
        assert_eq!(feed.focused(), None);
        assert!(!channel.unsubscribe(&market_key(&a.address)));

        // nothing focused, nothing fetched
        let calls = reader.source().calls.load(Ordering::SeqCst);
        feed.refresh().await;
        assert_eq!(reader.source().calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn detail_missing_market_keeps_last_good_value() {
        let (feed, reader, channel, a, _) = detail_feed();
        feed.focus(&channel, a.address).await;

        lock(&reader.source().accounts).retain(|acc| acc.address != a.address);
        feed.refresh().await;

        let snap = feed.current();
        assert_eq!(detail_title(&snap), Some("a"));
        assert!(!snap.loading);
        let err = snap.error.unwrap();
        assert!(err.contains("not found") && err.contains(&a.address.to_string()), "{err}");
    }
}
