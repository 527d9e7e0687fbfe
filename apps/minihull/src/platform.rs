//! # Platform Operations
//!
//! The process-scoped state of one mock platform and the operations a test
//! drives it with.
//!
//! Every state-changing operation follows the same sequence:
//!
//! 1. take the store write lock
//! 2. apply the mutation and compute the payload
//! 3. release the lock (the mutation is now committed)
//! 4. dispatch the notification to the subscribers seen at step 2
//!
//! A delivery failure at step 4 shows up in the returned [`DispatchReport`]
//! and never rolls back step 2.

use crate::config::{Config, PublicAddress};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::ledger::{Ledger, parse_body};
use crate::outbound::{OutboundClient, OutboundRequest};
use crate::snapshots::SnapshotDir;
use crate::stubs::StubRegistry;
use minihull_core::envelope::{
    TOPIC_ENTITY_UPDATE, TOPIC_GROUP_UPDATE, TOPIC_SUBSCRIBER_UPDATE, join_url, subscriber_url,
};
use minihull_core::types::{GROUP_IDS_FIELD, MANIFEST_FIELD, SETTINGS_FIELD, URL_FIELD};
use minihull_core::{
    Collection, Ident, MinihullError, Record, Report, SigningContext, Store, deep_merge, diff,
    group_ids, loose_equals, record_id, snapshot_to_bytes,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Path segment every inbound platform route lives under.
pub const API_PREFIX: &str = "/api/v1";

/// Response of a direct (non-notification) call to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallOutcome {
    pub status: u16,
    pub body: Value,
}

/// One mock platform instance.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Platform {
    store: Arc<RwLock<Store>>,
    ledger: Arc<Ledger>,
    stubs: Arc<StubRegistry>,
    client: OutboundClient,
    dispatcher: Dispatcher,
    address: Arc<PublicAddress>,
    secret: Arc<str>,
    snapshots: SnapshotDir,
}

impl Platform {
    pub fn new(config: &Config) -> Self {
        let ledger = Arc::new(Ledger::new());
        let client = OutboundClient::new(Arc::clone(&ledger));
        Self {
            store: Arc::new(RwLock::new(Store::new())),
            ledger,
            stubs: Arc::new(StubRegistry::new()),
            dispatcher: Dispatcher::new(client.clone()),
            client,
            address: Arc::new(PublicAddress::new(config)),
            secret: Arc::from(config.secret.as_str()),
            snapshots: SnapshotDir::new(config.snapshot_dir.clone()),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn store(&self) -> &Arc<RwLock<Store>> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn stubs(&self) -> &StubRegistry {
        &self.stubs
    }

    pub fn address(&self) -> &PublicAddress {
        &self.address
    }

    /// Organization address announced to connectors.
    pub fn org_addr(&self) -> String {
        self.address.get()
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Credentials for calling `subscriber_id`.
    pub fn signing_context(&self, subscriber_id: &str) -> SigningContext {
        SigningContext {
            organization: self.org_addr(),
            subscriber_id: subscriber_id.to_string(),
            secret: self.secret.to_string(),
        }
    }

    // =========================================================================
    // STORE ACCESS
    // =========================================================================

    /// Insert a record, keeping a supplied id.
    pub async fn insert(
        &self,
        collection: Collection,
        record: Record,
    ) -> Result<Record, MinihullError> {
        self.store.write().await.insert(collection, record)
    }

    /// Copy of the first record named by `ident`.
    pub async fn find(&self, collection: Collection, ident: &Ident) -> Option<Record> {
        self.store.read().await.resolve(collection, ident).cloned()
    }

    /// Copy of a whole collection.
    pub async fn all(&self, collection: Collection) -> Vec<Record> {
        self.store.read().await.all(collection).to_vec()
    }

    /// Entities for the batch endpoint, restricted to `ids` when given.
    ///
    /// Each entity carries its `group_ids` normalized to a list of strings.
    pub async fn batch_dump(&self, ids: Option<&[String]>) -> Vec<Record> {
        let store = self.store.read().await;
        let entities = match ids {
            Some(ids) => store.intersection_by_ids(Collection::Entities, ids),
            None => store.all(Collection::Entities).to_vec(),
        };
        entities
            .into_iter()
            .map(|mut entity| {
                let ids = group_ids(&entity);
                entity.insert(GROUP_IDS_FIELD.to_string(), json!(ids));
                entity
            })
            .collect()
    }

    // =========================================================================
    // NOTIFICATIONS
    // =========================================================================

    /// Fan `payload` out on `topic` to every interested subscriber.
    pub async fn notify(&self, topic: &str, payload: &Value) -> DispatchReport {
        let subscribers = self.all(Collection::Subscribers).await;
        self.dispatch_to(topic, payload, &subscribers).await
    }

    async fn dispatch_to(
        &self,
        topic: &str,
        payload: &Value,
        subscribers: &[Record],
    ) -> DispatchReport {
        self.dispatcher
            .dispatch(topic, payload, subscribers, &self.org_addr(), &self.secret)
            .await
    }

    async fn dispatch_report(
        &self,
        report: &Report,
        subscribers: &[Record],
    ) -> Result<DispatchReport, MinihullError> {
        let payload = serde_json::to_value(report)
            .map_err(|e| MinihullError::SerializationError(e.to_string()))?;
        Ok(self
            .dispatch_to(TOPIC_ENTITY_UPDATE, &payload, subscribers)
            .await)
    }

    // =========================================================================
    // SUBSCRIBERS
    // =========================================================================

    /// Register the connector served at `url`.
    ///
    /// Fetches `url/manifest.json`, stores a subscriber and announces it
    /// with `ship:update`.
    pub async fn install(&self, url: &str) -> Result<(Record, DispatchReport), MinihullError> {
        let base = url.trim_end_matches('/');
        let manifest = self
            .client
            .send_json(OutboundRequest::get(join_url(base, "manifest.json")))
            .await
            .map_err(|e| MinihullError::OutboundFailed(e.to_string()))?;

        let mut record = Record::new();
        record.insert(URL_FIELD.to_string(), json!(base));
        record.insert(MANIFEST_FIELD.to_string(), manifest);
        record.insert(SETTINGS_FIELD.to_string(), json!({}));

        let (subscriber, subscribers) = {
            let mut store = self.store.write().await;
            let subscriber = store.insert(Collection::Subscribers, record)?;
            (subscriber, store.all(Collection::Subscribers).to_vec())
        };
        tracing::info!(
            id = record_id(&subscriber).unwrap_or_default(),
            url = base,
            "Subscriber installed"
        );

        let report = self
            .dispatch_to(TOPIC_SUBSCRIBER_UPDATE, &Value::Object(subscriber.clone()), &subscribers)
            .await;
        Ok((subscriber, report))
    }

    /// Merge `settings` into a subscriber's settings and announce it.
    ///
    /// Without an id the first installed subscriber is used.
    pub async fn update_subscriber(
        &self,
        subscriber_id: Option<&str>,
        settings: &Record,
    ) -> Result<(Record, DispatchReport), MinihullError> {
        let (subscriber, subscribers) = {
            let mut store = self.store.write().await;
            let ident = subscriber_ident(&store, subscriber_id)?;
            let (_, after) = store
                .modify(Collection::Subscribers, &ident, |record| {
                    merge_settings(record, settings);
                })
                .ok_or_else(|| not_found(Collection::Subscribers, &ident))?;
            (after, store.all(Collection::Subscribers).to_vec())
        };
        let report = self
            .dispatch_to(TOPIC_SUBSCRIBER_UPDATE, &Value::Object(subscriber.clone()), &subscribers)
            .await;
        Ok((subscriber, report))
    }

    /// Merge settings written by a connector through the API, without
    /// notifying anyone. Returns the updated subscriber.
    pub async fn write_subscriber_settings(
        &self,
        subscriber_id: &str,
        settings: &Record,
    ) -> Option<Record> {
        self.store
            .write()
            .await
            .modify(Collection::Subscribers, &Ident::id(subscriber_id), |record| {
                merge_settings(record, settings);
            })
            .map(|(_, after)| after)
    }

    /// Resolve a subscriber by id, or the first one when `None`.
    pub async fn subscriber(&self, subscriber_id: Option<&str>) -> Result<Record, MinihullError> {
        let store = self.store.read().await;
        let ident = subscriber_ident(&store, subscriber_id)?;
        store
            .resolve(Collection::Subscribers, &ident)
            .cloned()
            .ok_or_else(|| not_found(Collection::Subscribers, &ident))
    }

    /// POST to `path` on a subscriber with the signing parameters.
    pub async fn call_subscriber(
        &self,
        path: &str,
        subscriber_id: Option<&str>,
        body: Option<Value>,
    ) -> Result<CallOutcome, MinihullError> {
        let subscriber = self.subscriber(subscriber_id).await?;
        let (id, base) = subscriber_target(&subscriber)?;
        let mut request =
            OutboundRequest::post(join_url(base, path)).query(self.signing_context(id).query());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| MinihullError::OutboundFailed(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MinihullError::OutboundFailed(e.to_string()))?;
        Ok(CallOutcome {
            status,
            body: parse_body(&bytes),
        })
    }

    /// Ask a subscriber to pull the entity dump from `/_batch`.
    pub async fn batch(&self, subscriber_id: Option<&str>) -> Result<CallOutcome, MinihullError> {
        let body = json!({
            "url": format!("http://{}/_batch", self.org_addr()),
            "format": "json",
        });
        self.call_subscriber("/batch", subscriber_id, Some(body))
            .await
    }

    /// Signed url of a subscriber's admin page, if its manifest has one.
    pub async fn dashboard_url(
        &self,
        subscriber_id: Option<&str>,
    ) -> Result<Option<String>, MinihullError> {
        let subscriber = self.subscriber(subscriber_id).await?;
        let (id, base) = subscriber_target(&subscriber)?;
        let admin = subscriber
            .get(MANIFEST_FIELD)
            .and_then(|m| m.get("admin"))
            .and_then(Value::as_str);
        let Some(admin) = admin else {
            return Ok(None);
        };
        let url = Url::parse_with_params(&join_url(base, admin), self.signing_context(id).query())
            .map_err(|e| {
                MinihullError::InvalidArguments(format!("invalid dashboard url for {id}: {e}"))
            })?;
        Ok(Some(url.into()))
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// Report bundle for an entity, without dispatching.
    pub async fn report(&self, ident: &Ident) -> Result<Report, MinihullError> {
        let store = self.store.read().await;
        let entity = store
            .resolve(Collection::Entities, ident)
            .cloned()
            .ok_or_else(|| not_found(Collection::Entities, ident))?;
        let groups = store.matching_groups(&entity);
        Ok(Report::new(entity, groups))
    }

    /// Merge `patch` into an entity and announce the change.
    ///
    /// The report carries `diff(previous, patch)`.
    pub async fn update_entity(
        &self,
        ident: &Ident,
        patch: &Record,
    ) -> Result<(Report, DispatchReport), MinihullError> {
        let (report, subscribers) = {
            let mut store = self.store.write().await;
            let (before, after) = store
                .update(Collection::Entities, ident, patch)
                .ok_or_else(|| not_found(Collection::Entities, ident))?;
            let changes = diff(&before, patch);
            let groups = store.matching_groups(&after);
            (
                Report::new(after, groups).with_changes(changes),
                store.all(Collection::Subscribers).to_vec(),
            )
        };
        let dispatched = self.dispatch_report(&report, &subscribers).await?;
        Ok((report, dispatched))
    }

    /// Add `group_id` to an entity's groups and announce it.
    ///
    /// Existing ids are kept untouched, whatever their type.
    pub async fn enter_group(
        &self,
        ident: &Ident,
        group_id: &str,
    ) -> Result<(Report, DispatchReport), MinihullError> {
        self.edit_membership(ident, |record| match record.get_mut(GROUP_IDS_FIELD) {
            Some(Value::Array(ids)) => {
                if !ids.iter().any(|id| id.as_str() == Some(group_id)) {
                    ids.push(json!(group_id));
                }
            }
            _ => {
                record.insert(GROUP_IDS_FIELD.to_string(), json!([group_id]));
            }
        })
        .await
    }

    /// Remove every occurrence of `group_id` from an entity's groups and
    /// announce it. Occurrences are compared loosely.
    pub async fn exit_group(
        &self,
        ident: &Ident,
        group_id: &str,
    ) -> Result<(Report, DispatchReport), MinihullError> {
        let target = Value::String(group_id.to_string());
        self.edit_membership(ident, |record| {
            if let Some(Value::Array(ids)) = record.get_mut(GROUP_IDS_FIELD) {
                ids.retain(|id| !loose_equals(id, &target));
            }
        })
        .await
    }

    async fn edit_membership<F>(
        &self,
        ident: &Ident,
        edit: F,
    ) -> Result<(Report, DispatchReport), MinihullError>
    where
        F: FnOnce(&mut Record),
    {
        let (report, subscribers) = {
            let mut store = self.store.write().await;
            let (_, after) = store
                .modify(Collection::Entities, ident, edit)
                .ok_or_else(|| not_found(Collection::Entities, ident))?;
            let groups = store.matching_groups(&after);
            (
                Report::new(after, groups),
                store.all(Collection::Subscribers).to_vec(),
            )
        };
        let dispatched = self.dispatch_report(&report, &subscribers).await?;
        Ok((report, dispatched))
    }

    // =========================================================================
    // GROUPS
    // =========================================================================

    /// Rename a group and announce it with `segment:update`.
    pub async fn rename_group(
        &self,
        group_id: &str,
        name: &str,
    ) -> Result<(Record, DispatchReport), MinihullError> {
        let ident = Ident::id(group_id);
        let (group, subscribers) = {
            let mut store = self.store.write().await;
            let now = chrono::Utc::now().to_rfc3339();
            let (_, after) = store
                .modify(Collection::Groups, &ident, |record| {
                    record.insert("name".to_string(), json!(name));
                    record.insert("updated_at".to_string(), json!(now));
                })
                .ok_or_else(|| not_found(Collection::Groups, &ident))?;
            (after, store.all(Collection::Subscribers).to_vec())
        };
        let report = self
            .dispatch_to(TOPIC_GROUP_UPDATE, &Value::Object(group.clone()), &subscribers)
            .await;
        Ok((group, report))
    }

    // =========================================================================
    // STUBS
    // =========================================================================

    /// Answer subscriber reads and writes with `subscriber`, whether
    /// addressed by id or through the `app` alias.
    pub fn stub_subscriber(&self, subscriber: &Record) -> Result<(), MinihullError> {
        let id = record_id(subscriber).ok_or_else(|| {
            MinihullError::InvalidArguments("stubbed subscriber needs a string id".to_string())
        })?;
        let body = Value::Object(subscriber.clone());
        for path in [
            format!("{API_PREFIX}/subscribers/{id}"),
            format!("{API_PREFIX}/subscribers/app"),
        ] {
            self.stubs.stub_get(path.as_str()).respond(body.clone());
            self.stubs.stub_put(path).respond(body.clone());
        }
        Ok(())
    }

    /// Answer the group listing with `groups`.
    pub fn stub_groups(&self, groups: Vec<Record>) {
        let body = Value::Array(groups.into_iter().map(Value::Object).collect());
        self.stubs
            .stub_get(format!("{API_PREFIX}/groups"))
            .respond(body);
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Clear the store, the ledger and every stub. Pending ledger waits
    /// fail. Issued ids stay retired.
    pub async fn reset(&self) {
        self.store.write().await.reset();
        self.ledger.reset();
        self.stubs.clear();
        tracing::info!("Platform state reset");
    }

    /// Save the store under `name` in the snapshot directory.
    pub async fn save(&self, name: &str) -> Result<PathBuf, MinihullError> {
        let bytes = {
            let store = self.store.read().await;
            snapshot_to_bytes(&store)?
        };
        self.snapshots.save(name, bytes).await
    }

    /// Replace the store with the snapshot saved under `name`.
    pub async fn load(&self, name: &str) -> Result<(), MinihullError> {
        let snapshot = self.snapshots.load(name).await?;
        let mut store = self.store.write().await;
        snapshot.restore_into(&mut store)?;
        tracing::info!(name, "Snapshot loaded");
        Ok(())
    }

    /// Names of saved snapshots.
    pub fn list_snapshots(&self) -> Result<Vec<String>, MinihullError> {
        self.snapshots.list()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn not_found(collection: Collection, ident: &Ident) -> MinihullError {
    MinihullError::RecordNotFound {
        collection,
        ident: ident.to_string(),
    }
}

/// Ident of the named subscriber, or of the first one.
fn subscriber_ident(store: &Store, subscriber_id: Option<&str>) -> Result<Ident, MinihullError> {
    match subscriber_id {
        Some(id) => Ok(Ident::id(id)),
        None => store
            .nth(Collection::Subscribers, 0)
            .and_then(record_id)
            .map(Ident::id)
            .ok_or_else(|| MinihullError::RecordNotFound {
                collection: Collection::Subscribers,
                ident: "first".to_string(),
            }),
    }
}

fn subscriber_target(subscriber: &Record) -> Result<(&str, &str), MinihullError> {
    match (record_id(subscriber), subscriber_url(subscriber)) {
        (Some(id), Some(url)) => Ok((id, url)),
        _ => Err(MinihullError::InvalidArguments(
            "subscriber has no id or url".to_string(),
        )),
    }
}

fn merge_settings(record: &mut Record, settings: &Record) {
    match record.get_mut(SETTINGS_FIELD) {
        Some(Value::Object(existing)) => deep_merge(existing, settings),
        _ => {
            record.insert(SETTINGS_FIELD.to_string(), Value::Object(settings.clone()));
        }
    }
}
