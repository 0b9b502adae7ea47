//! Persistence of entity graphs through a [`Transport`].
//!
//! A save runs in at most two sequential round-trips: one batch creating
//! the unsaved children the roots refer to, then the create or update of
//! the roots themselves. Graphs that would need more than that are
//! rejected before anything is sent.

mod batch;
mod options;

pub use batch::{BatchOutcome, BatchRequest};
pub use options::{Condition, SaveOption};

use serde_json::{Value as JsonValue, json};
use std::collections::HashSet;
use tracing::{Instrument, Level, event, info_span};

use crate::codec::{ValueDecoder, ValueEncoder};
use crate::config::ClientConfig;
use crate::core::{ObjectError, Result};
use crate::entity::{EntityKey, EntityStore};
use crate::graph::{direct_references, unsaved_dependencies};
use crate::transport::{HttpTransport, Method, Request, Session, Transport};
use batch::{collect_failures, parse_batch_response};

/// Backend client.
///
/// # Examples
///
/// ```no_run
/// use cloudobject::{Client, ClientConfig, EntityStore, Session};
///
/// # async fn run() -> cloudobject::Result<()> {
/// let client = Client::connect(ClientConfig::from_env()?)?;
/// let mut store = EntityStore::new();
///
/// let post = store.create("Post")?;
/// store.get_mut(post)?.set("title", "hello")?;
/// client.save(&mut store, post, &Session::anonymous()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
}

impl Client<HttpTransport> {
    /// Client talking to the configured server over HTTPS.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self { config, transport })
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn save(&self, store: &mut EntityStore, key: EntityKey, session: &Session) -> Result<()> {
        self.save_with_option(store, key, &SaveOption::default(), session)
            .await
    }

    /// Persist `key` and the unsaved entities it refers to.
    ///
    /// Fails with `UnpersistableGraph`, before any request, when an unsaved
    /// child itself refers to another unsaved entity. If creating the
    /// children partly fails, the created ones keep their ids and the root
    /// is not sent.
    pub async fn save_with_option(
        &self,
        store: &mut EntityStore,
        key: EntityKey,
        option: &SaveOption,
        session: &Session,
    ) -> Result<()> {
        let entity = store.get(key)?;
        let span = info_span!(
            "client.save",
            class_name = %entity.class_name(),
            object_id = ?entity.id()
        );

        async move {
            if !store.get(key)?.is_dirty() {
                event!(Level::DEBUG, "nothing to save");
                return Ok(());
            }
            check_roots(store, &[key])?;
            let children = unsaved_dependencies(store, &[key])?;
            if !children.is_empty() {
                self.create_children(store, &children, session).await?;
            }

            let entity = store.get(key)?;
            let query = option.query(store, entity.is_new())?;
            let body = JsonValue::Object(ValueEncoder::encode_pending(store, key)?);
            let mut request = match entity.id() {
                Some(id) => Request::new(Method::Put, object_path(entity.class_name(), id)),
                None => Request::new(Method::Post, class_path(entity.class_name())),
            }
            .body(body);
            request.query = query;

            let response = match self.transport.send(request, session).await {
                Ok(response) => response,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "save request failed");
                    return Err(err);
                }
            };
            ValueDecoder::merge_after_save(store, key, &response)?;
            event!(Level::DEBUG, children = children.len(), "object saved");
            Ok::<_, ObjectError>(())
        }
        .instrument(span)
        .await
    }

    /// Persist several roots: one batch creating their unsaved children,
    /// then one batch with every dirty root.
    pub async fn save_all(&self, store: &mut EntityStore, keys: &[EntityKey], session: &Session) -> Result<()> {
        let span = info_span!("client.save_all", roots = keys.len());

        async move {
            let mut roots = Vec::new();
            for key in keys {
                if store.get(*key)?.is_dirty() && !roots.contains(key) {
                    roots.push(*key);
                }
            }
            if roots.is_empty() {
                event!(Level::DEBUG, "nothing to save");
                return Ok(());
            }

            check_roots(store, &roots)?;
            let children = unsaved_dependencies(store, &roots)?;
            if !children.is_empty() {
                self.create_children(store, &children, session).await?;
            }

            let requests = roots
                .iter()
                .map(|key| save_request(store, *key))
                .collect::<Result<Vec<_>>>()?;
            let outcomes = self.batch(requests, session).await?;
            merge_saved(store, &roots, outcomes)
        }
        .instrument(span)
        .await
    }

    /// Reload the fields of a saved entity. Pending operations are kept and
    /// reapplied over the fetched values.
    pub async fn fetch(&self, store: &mut EntityStore, key: EntityKey, session: &Session) -> Result<()> {
        let entity = store.get(key)?;
        let id = persisted_id(entity.id(), "fetch")?;
        let path = object_path(entity.class_name(), id);
        let span = info_span!("client.fetch", path = %path);

        async move {
            let response = self.transport.send(Request::new(Method::Get, path), session).await?;
            match response {
                JsonValue::Object(data) if !data.is_empty() => {
                    ValueDecoder::merge_server_data(store, key, &data)
                }
                _ => Err(ObjectError::Cloud {
                    status: None,
                    code: 101,
                    message: "Object not found.".into(),
                }),
            }
        }
        .instrument(span)
        .await
    }

    pub async fn destroy(&self, store: &EntityStore, key: EntityKey, session: &Session) -> Result<()> {
        let entity = store.get(key)?;
        let id = persisted_id(entity.id(), "destroy")?;
        let path = object_path(entity.class_name(), id);
        let span = info_span!("client.destroy", path = %path);

        async move {
            self.transport
                .send(Request::new(Method::Delete, path), session)
                .await?;
            event!(Level::DEBUG, "object destroyed");
            Ok::<_, ObjectError>(())
        }
        .instrument(span)
        .await
    }

    /// Delete several saved entities in one batch.
    pub async fn destroy_all(&self, store: &EntityStore, keys: &[EntityKey], session: &Session) -> Result<()> {
        let requests = keys
            .iter()
            .map(|key| {
                let entity = store.get(*key)?;
                let id = persisted_id(entity.id(), "destroy")?;
                Ok(BatchRequest::new(Method::Delete, object_path(entity.class_name(), id)))
            })
            .collect::<Result<Vec<_>>>()?;
        if requests.is_empty() {
            return Ok(());
        }

        let outcomes = self.batch(requests, session).await?;
        match collect_failures(&outcomes) {
            Some(error) => Err(ObjectError::Batch(error)),
            None => Ok(()),
        }
    }

    /// Send several requests in one call. Outcomes are returned in request
    /// order; an item failure does not fail the call.
    pub async fn batch(&self, requests: Vec<BatchRequest>, session: &Session) -> Result<Vec<BatchOutcome>> {
        let span = info_span!("client.batch", items = requests.len());

        async move {
            let wire_requests = requests
                .into_iter()
                .map(|mut request| {
                    request.path = self.config.api_path(&request.path);
                    serde_json::to_value(request)
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let body = json!({ "requests": wire_requests });
            let response = self
                .transport
                .send(Request::new(Method::Post, "/batch").body(body), session)
                .await?;
            let outcomes = parse_batch_response(&wire_requests, response)?;

            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            if failed > 0 {
                event!(Level::WARN, failed, "batch items failed");
            }
            Ok::<_, ObjectError>(outcomes)
        }
        .instrument(span)
        .await
    }

    /// Full form of the graph rooted at `key`; repeated entities are written
    /// as pointers.
    pub fn encode_full(&self, store: &EntityStore, key: EntityKey) -> Result<JsonValue> {
        ValueEncoder::encode_full(store, key, &mut HashSet::new())
    }

    async fn create_children(&self, store: &mut EntityStore, children: &[EntityKey], session: &Session) -> Result<()> {
        event!(Level::DEBUG, count = children.len(), "creating unsaved children");
        let requests = children
            .iter()
            .map(|key| save_request(store, *key))
            .collect::<Result<Vec<_>>>()?;
        let outcomes = self.batch(requests, session).await?;
        merge_saved(store, children, outcomes)
    }
}

/// A root cannot be encoded while it refers to another unsaved root, or to
/// itself before it has an id.
fn check_roots(store: &EntityStore, roots: &[EntityKey]) -> Result<()> {
    for root in roots {
        for reference in direct_references(store, *root)? {
            let target = store.get(reference)?;
            if target.is_new() && roots.contains(&reference) {
                return Err(ObjectError::UnpersistableGraph(format!(
                    "unsaved {} refers to unsaved {} saved in the same call",
                    store.get(*root)?.class_name(),
                    target.class_name()
                )));
            }
        }
    }
    Ok(())
}

fn save_request(store: &EntityStore, key: EntityKey) -> Result<BatchRequest> {
    let entity = store.get(key)?;
    let body = JsonValue::Object(ValueEncoder::encode_pending(store, key)?);
    let request = match entity.id() {
        Some(id) => BatchRequest::new(Method::Put, object_path(entity.class_name(), id)),
        None => BatchRequest::new(Method::Post, class_path(entity.class_name())),
    };
    Ok(request.body(body))
}

/// Merge every successful item, then report the failed ones together.
///
/// A response that cannot be merged does not stop the others from being
/// merged; the first such error is returned once every item was handled.
fn merge_saved(store: &mut EntityStore, keys: &[EntityKey], outcomes: Vec<BatchOutcome>) -> Result<()> {
    let failures = collect_failures(&outcomes);
    let mut merge_error = None;
    for (key, outcome) in keys.iter().zip(outcomes) {
        if let Ok(response) = outcome {
            if let Err(err) = ValueDecoder::merge_after_save(store, *key, &response) {
                event!(Level::ERROR, error = %err, "cannot merge saved object");
                merge_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = merge_error {
        return Err(err);
    }
    match failures {
        Some(error) => {
            event!(Level::ERROR, error = %error, "batch save failed");
            Err(ObjectError::Batch(error))
        }
        None => Ok(()),
    }
}

fn persisted_id<'a>(id: Option<&'a str>, action: &str) -> Result<&'a str> {
    id.ok_or_else(|| ObjectError::InvalidArgument(format!("Cannot {} an unsaved object", action)))
}

fn class_path(class_name: &str) -> String {
    format!("/classes/{}", class_name)
}

fn object_path(class_name: &str, id: &str) -> String {
    format!("/classes/{}/{}", class_name, id)
}
