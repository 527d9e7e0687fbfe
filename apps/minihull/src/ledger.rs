//! # Request Capture Ledger
//!
//! Append-only record of every inbound and outbound HTTP exchange, with
//! one-shot waits a test can await instead of sleeping.
//!
//! ## Ordering
//!
//! Each direction has its own 1-based sequence. Inbound exchanges take
//! their position when the request is received; waits for them are released
//! once the response has been produced, so an awaiting test sees the
//! handler's effects. Outbound exchanges take their position when the call
//! is initiated and release waits immediately.
//!
//! A wait is bound to a position when a matching exchange is appended and
//! is released when that position is published. Which entry a wait resolves
//! to depends only on arrival order: a slow request on a path still wins
//! over a faster one that arrived after it.
//!
//! ## Waits
//!
//! - [`Ledger::nth`]: the exchange at a position. Registering after that
//!   position was received never fires.
//! - [`Ledger::next_at_path`]: the first exchange on a path received after
//!   registration. Fires once.
//! - [`Ledger::next`]: the next exchange received in a direction.
//!
//! None of these have a built-in deadline; use [`LedgerWait::wait_for`].

use axum::http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use url::form_urlencoded;

// =============================================================================
// ENTRIES
// =============================================================================

/// Which way an exchange went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A request received by the mock platform.
    Inbound,
    /// A request the mock platform made to a connector.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Request data captured for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    /// Absolute url, for outbound exchanges.
    pub url: Option<String>,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    /// Parsed JSON body, the raw text when it is not JSON, `null` when empty.
    pub body: Value,
}

impl Exchange {
    /// Capture an inbound request from its parts and buffered body.
    #[must_use]
    pub fn inbound(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Self {
        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            url: None,
            headers: header_map(headers),
            query: uri.query().map(parse_query).unwrap_or_default(),
            body: parse_body(body),
        }
    }
}

/// An exchange with its place in the ledger. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub direction: Direction,
    /// 1-based position within `direction`.
    pub position: usize,
    #[serde(flatten)]
    pub exchange: Exchange,
}

impl std::ops::Deref for LedgerEntry {
    type Target = Exchange;

    fn deref(&self) -> &Exchange {
        &self.exchange
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Decode an `application/x-www-form-urlencoded` query string.
///
/// A repeated key keeps its last value.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Interpret a captured body.
pub fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why a ledger wait did not produce an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The deadline passed first.
    Timeout { waiting_for: String, after: Duration },
    /// The ledger was reset while waiting.
    Closed { waiting_for: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { waiting_for, after } => {
                write!(f, "Timed out after {:?} waiting for {}", after, waiting_for)
            }
            Self::Closed { waiting_for } => {
                write!(f, "Ledger reset while waiting for {}", waiting_for)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

// =============================================================================
// WAITS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    Nth(Direction, usize),
    NextAtPath(Direction, String),
    Next(Direction),
}

impl Trigger {
    fn direction(&self) -> Direction {
        match self {
            Self::Nth(direction, _) | Self::NextAtPath(direction, _) | Self::Next(direction) => {
                *direction
            }
        }
    }

    fn fires_on(&self, entry: &LedgerEntry) -> bool {
        match self {
            Self::Nth(direction, n) => *direction == entry.direction && *n == entry.position,
            Self::NextAtPath(direction, path) => {
                *direction == entry.direction && *path == entry.exchange.path
            }
            Self::Next(direction) => *direction == entry.direction,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nth(direction, n) => write!(f, "{} exchange #{}", direction, n),
            Self::NextAtPath(direction, path) => write!(f, "next {} exchange at {}", direction, path),
            Self::Next(direction) => write!(f, "next {} exchange", direction),
        }
    }
}

struct Waiter {
    trigger: Trigger,
    sender: oneshot::Sender<LedgerEntry>,
    /// Position of the entry this wait resolves to, set on append.
    bound: Option<usize>,
}

/// A pending one-shot wait on the ledger.
#[must_use = "a wait does nothing unless awaited"]
pub struct LedgerWait {
    description: String,
    receiver: oneshot::Receiver<LedgerEntry>,
}

impl LedgerWait {
    /// Wait with no deadline.
    pub async fn wait(self) -> Result<LedgerEntry, LedgerError> {
        self.receiver.await.map_err(|_| LedgerError::Closed {
            waiting_for: self.description,
        })
    }

    /// Wait at most `deadline`, failing with [`LedgerError::Timeout`].
    pub async fn wait_for(self, deadline: Duration) -> Result<LedgerEntry, LedgerError> {
        let description = self.description.clone();
        match tokio::time::timeout(deadline, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout {
                waiting_for: description,
                after: deadline,
            }),
        }
    }
}

// =============================================================================
// LEDGER
// =============================================================================

#[derive(Default)]
struct Inner {
    inbound: Vec<LedgerEntry>,
    outbound: Vec<LedgerEntry>,
    waiters: Vec<Waiter>,
}

impl Inner {
    fn entries(&self, direction: Direction) -> &Vec<LedgerEntry> {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn entries_mut(&mut self, direction: Direction) -> &mut Vec<LedgerEntry> {
        match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        }
    }
}

/// Shared capture ledger for one mock platform instance.
#[derive(Default)]
pub struct Ledger {
    inner: Mutex<Inner>,
}

impl Ledger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an exchange without releasing waits. Returns its position.
    ///
    /// Unbound waits that match the new entry are bound to it here.
    pub fn append(&self, direction: Direction, exchange: Exchange) -> usize {
        let mut inner = self.lock();
        let position = inner.entries(direction).len() + 1;
        tracing::debug!(
            direction = %direction,
            position,
            path = %exchange.path,
            method = %exchange.method,
            "Exchange captured"
        );
        let entry = LedgerEntry {
            direction,
            position,
            exchange,
        };
        inner.waiters.retain(|waiter| !waiter.sender.is_closed());
        for waiter in inner.waiters.iter_mut() {
            if waiter.bound.is_none() && waiter.trigger.fires_on(&entry) {
                waiter.bound = Some(position);
            }
        }
        inner.entries_mut(direction).push(entry);
        position
    }

    /// Release the waits bound to an appended entry.
    ///
    /// Publishing out of position order is fine; each wait still receives
    /// the entry it was bound to on append.
    pub fn publish(&self, direction: Direction, position: usize) {
        let mut inner = self.lock();
        let Some(entry) = position
            .checked_sub(1)
            .and_then(|i| inner.entries(direction).get(i))
            .cloned()
        else {
            return;
        };
        let waiters = std::mem::take(&mut inner.waiters);
        for waiter in waiters {
            if waiter.bound == Some(position) && waiter.trigger.direction() == direction {
                // A dropped receiver just means nobody is listening anymore.
                let _ = waiter.sender.send(entry.clone());
            } else if !waiter.sender.is_closed() {
                inner.waiters.push(waiter);
            }
        }
    }

    /// Append and release in one step.
    pub fn capture(&self, direction: Direction, exchange: Exchange) -> usize {
        let position = self.append(direction, exchange);
        self.publish(direction, position);
        position
    }

    fn register(&self, trigger: Trigger) -> LedgerWait {
        let (sender, receiver) = oneshot::channel();
        let description = trigger.to_string();
        self.lock().waiters.push(Waiter {
            trigger,
            sender,
            bound: None,
        });
        LedgerWait {
            description,
            receiver,
        }
    }

    /// Wait for the exchange at 1-based `position` in `direction`.
    pub fn nth(&self, direction: Direction, position: usize) -> LedgerWait {
        self.register(Trigger::Nth(direction, position))
    }

    /// Wait for the first exchange in `direction` on `path` received after
    /// this call.
    pub fn next_at_path(&self, direction: Direction, path: impl Into<String>) -> LedgerWait {
        self.register(Trigger::NextAtPath(direction, path.into()))
    }

    /// Wait for the first exchange in `direction` received after this call.
    pub fn next(&self, direction: Direction) -> LedgerWait {
        self.register(Trigger::Next(direction))
    }

    /// Wait for the nth inbound exchange.
    pub fn nth_inbound(&self, position: usize) -> LedgerWait {
        self.nth(Direction::Inbound, position)
    }

    /// Wait for the next inbound exchange on `path`.
    pub fn next_inbound_at(&self, path: impl Into<String>) -> LedgerWait {
        self.next_at_path(Direction::Inbound, path)
    }

    /// Wait for the nth outbound exchange.
    pub fn nth_outbound(&self, position: usize) -> LedgerWait {
        self.nth(Direction::Outbound, position)
    }

    /// Number of exchanges captured so far in `direction`.
    pub fn count(&self, direction: Direction) -> usize {
        self.lock().entries(direction).len()
    }

    /// Copy of every entry in `direction`, in position order.
    pub fn entries(&self, direction: Direction) -> Vec<LedgerEntry> {
        self.lock().entries(direction).clone()
    }

    /// Entry at 1-based `position`.
    pub fn entry(&self, direction: Direction, position: usize) -> Option<LedgerEntry> {
        let inner = self.lock();
        position
            .checked_sub(1)
            .and_then(|i| inner.entries(direction).get(i))
            .cloned()
    }

    /// Most recent entry in `direction`.
    pub fn last(&self, direction: Direction) -> Option<LedgerEntry> {
        self.lock().entries(direction).last().cloned()
    }

    /// Drop every entry and fail every pending wait.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.inbound.clear();
        inner.outbound.clear();
        inner.waiters.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Exchange {
        Exchange {
            method: "GET".to_string(),
            path: path.to_string(),
            ..Exchange::default()
        }
    }

    #[tokio::test]
    async fn nth_and_path_waits_follow_arrival_order() {
        let ledger = Ledger::new();
        let second = ledger.nth_inbound(2);
        let first_a = ledger.next_inbound_at("/a");

        ledger.capture(Direction::Inbound, get("/a"));
        ledger.capture(Direction::Inbound, get("/b"));
        ledger.capture(Direction::Inbound, get("/a"));

        let second = second.wait().await.expect("second");
        assert_eq!(second.path, "/b");
        assert_eq!(second.position, 2);

        let first_a = first_a.wait().await.expect("first /a");
        assert_eq!(first_a.position, 1);
        assert_eq!(ledger.count(Direction::Inbound), 3);
    }

    #[tokio::test]
    async fn nth_wait_never_fires_retroactively() {
        let ledger = Ledger::new();
        ledger.capture(Direction::Inbound, get("/a"));

        let late = ledger.nth_inbound(1);
        let result = late.wait_for(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LedgerError::Timeout { .. })));
    }

    #[tokio::test]
    async fn path_wait_fires_once() {
        let ledger = Ledger::new();
        let wait = ledger.next_inbound_at("/a");
        ledger.capture(Direction::Inbound, get("/a"));
        ledger.capture(Direction::Inbound, get("/a"));
        assert_eq!(wait.wait().await.expect("fired").position, 1);
        // The fired waiter is gone; only entries remain.
        assert!(ledger.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn directions_are_numbered_independently() {
        let ledger = Ledger::new();
        let outbound = ledger.nth_outbound(1);
        ledger.capture(Direction::Inbound, get("/in"));
        ledger.capture(Direction::Outbound, get("/out"));
        assert_eq!(outbound.wait().await.expect("outbound").path, "/out");
        assert_eq!(
            ledger.entry(Direction::Inbound, 1).map(|e| e.exchange.path),
            Some("/in".to_string())
        );
    }

    #[tokio::test]
    async fn append_holds_waits_until_publish() {
        let ledger = Ledger::new();
        let wait = ledger.next(Direction::Inbound);
        let position = ledger.append(Direction::Inbound, get("/slow"));
        assert_eq!(ledger.lock().waiters.len(), 1);
        ledger.publish(Direction::Inbound, position);
        assert_eq!(wait.wait().await.expect("released").path, "/slow");
    }

    #[tokio::test]
    async fn reset_fails_pending_waits() {
        let ledger = Ledger::new();
        let wait = ledger.nth_inbound(5);
        ledger.reset();
        assert!(matches!(wait.wait().await, Err(LedgerError::Closed { .. })));
    }

    #[tokio::test]
    async fn slow_response_does_not_lose_its_place() {
        let ledger = Ledger::new();
        let first = ledger.next_inbound_at("/install");
        let any = ledger.next(Direction::Inbound);

        let slow = ledger.append(Direction::Inbound, get("/install"));
        let fast = ledger.append(Direction::Inbound, get("/install"));
        ledger.publish(Direction::Inbound, fast);

        // The fast entry is out, but both waits belong to the slow one.
        assert_eq!(ledger.lock().waiters.len(), 2);
        ledger.publish(Direction::Inbound, slow);

        assert_eq!(first.wait().await.expect("first").position, slow);
        assert_eq!(any.wait().await.expect("any").position, slow);
    }

    #[tokio::test]
    async fn wait_ignores_requests_already_in_flight() {
        let ledger = Ledger::new();
        let in_flight = ledger.append(Direction::Inbound, get("/a"));
        let wait = ledger.next_inbound_at("/a");
        ledger.publish(Direction::Inbound, in_flight);

        let later = ledger.capture(Direction::Inbound, get("/a"));
        let entry = wait
            .wait_for(Duration::from_millis(200))
            .await
            .expect("later request");
        assert_eq!(entry.position, later);
        assert_eq!(later, 2);
    }

    #[tokio::test]
    async fn nth_wait_registered_mid_flight_still_fires() {
        let ledger = Ledger::new();
        let position = ledger.append(Direction::Inbound, get("/a"));
        let wait = ledger.nth_inbound(2);
        let next = ledger.append(Direction::Inbound, get("/b"));
        ledger.publish(Direction::Inbound, next);
        ledger.publish(Direction::Inbound, position);
        assert_eq!(wait.wait().await.expect("second").path, "/b");
    }

    #[test]
    fn query_and_body_parsing() {
        let query = parse_query("ship=abc&organization=localhost%3A8001&flag");
        assert_eq!(query.get("organization").map(String::as_str), Some("localhost:8001"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
        let query = parse_query("secret=a%2Bb+c&note=%E2%9C%93");
        assert_eq!(query.get("secret").map(String::as_str), Some("a+b c"));
        assert_eq!(query.get("note").map(String::as_str), Some("\u{2713}"));
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(b"{\"a\":1}"), serde_json::json!({"a": 1}));
        assert_eq!(parse_body(b"ok"), Value::String("ok".to_string()));
    }
}
