//! Background refresh of stream titles.
//!
//! A [`TitleRefresher`] is spawned per streaming connection. Each cycle it
//! asks its [`TitleSource`] for a new title and pushes the result into the
//! connection's [`TitleHandle`], then sleeps until the next cycle. Failed
//! cycles are logged and leave the previous title in place.
//!
//! The task stops as soon as its [`CancellationToken`] fires, including in
//! the middle of a fetch, and never updates the title after that. A panic
//! inside a cycle is caught at the task boundary and ends the task.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    error::{IcyError, Result},
    injector::TitleHandle,
    template::TitleTemplate,
};

/// Delay between two refresh cycles when nothing else is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Something able to produce the current stream title.
#[async_trait]
pub trait TitleSource: Send + Sync {
    /// Fetches and renders the current title.
    async fn fetch_title(&self) -> Result<String>;

    /// Human readable origin of the titles, used in logs.
    fn describe(&self) -> String;
}

/// Title source backed by a JSON endpoint and a [`TitleTemplate`].
#[derive(Debug, Clone)]
pub struct JsonTitleSource {
    client: reqwest::Client,
    url: Url,
    template: TitleTemplate,
}

impl JsonTitleSource {
    pub fn new(client: reqwest::Client, url: Url, template: TitleTemplate) -> Self {
        Self {
            client,
            url,
            template,
        }
    }

    /// Builds a source from a template string, failing on a malformed template.
    pub fn with_format(client: reqwest::Client, url: Url, format: &str) -> Result<Self> {
        let template = TitleTemplate::parse(format)?;
        Ok(Self::new(client, url, template))
    }

    /// GETs the endpoint and decodes the body as a JSON object.
    pub async fn fetch_document(&self) -> Result<Map<String, Value>> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body)? {
            Value::Object(map) => Ok(map),
            other => Err(IcyError::NotAnObject(json_kind(&other))),
        }
    }
}

#[async_trait]
impl TitleSource for JsonTitleSource {
    async fn fetch_title(&self) -> Result<String> {
        let document = self.fetch_document().await?;
        Ok(self.template.render(&document))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lifecycle of a spawned refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherState {
    Running,
    Stopped,
}

/// Periodic title refresh task, not yet spawned.
pub struct TitleRefresher {
    source: Arc<dyn TitleSource>,
    interval: Duration,
}

impl TitleRefresher {
    pub fn new(source: Arc<dyn TitleSource>) -> Self {
        Self {
            source,
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Sets the delay between two cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts refreshing `target` until `token` is cancelled.
    ///
    /// The first fetch happens right away. Dropping the returned handle
    /// cancels the task.
    pub fn spawn(self, target: TitleHandle, token: CancellationToken) -> RefresherHandle {
        let (state_tx, state_rx) = watch::channel(RefresherState::Running);
        let task_token = token.clone();
        let origin = self.source.describe();

        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.run(target, task_token))
                .catch_unwind()
                .await;

            if let Err(panic) = outcome {
                error!(
                    source = %origin,
                    "Title refresher panicked: {}",
                    panic_message(panic.as_ref())
                );
            }

            state_tx.send_replace(RefresherState::Stopped);
        });

        RefresherHandle {
            token,
            state: state_rx,
            join: Some(join),
        }
    }

    async fn run(self, target: TitleHandle, token: CancellationToken) {
        debug!(source = %self.source.describe(), "Title refresher started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                fetched = self.source.fetch_title() => fetched,
            };

            match fetched {
                Ok(title) => {
                    if token.is_cancelled() {
                        break;
                    }
                    target.set_title(title);
                }
                Err(err) => {
                    warn!(
                        source = %self.source.describe(),
                        "Failed to refresh stream title: {}",
                        err
                    );
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!(source = %self.source.describe(), "Title refresher stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Owner of a spawned [`TitleRefresher`].
///
/// Dropping the handle cancels the task, so tying the handle to a response
/// body stops refreshing when the client goes away.
pub struct RefresherHandle {
    token: CancellationToken,
    state: watch::Receiver<RefresherState>,
    join: Option<JoinHandle<()>>,
}

impl RefresherHandle {
    /// Requests the task to stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> RefresherState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RefresherState::Stopped
    }

    /// Waits until the task reaches [`RefresherState::Stopped`] on its own.
    pub async fn stopped(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == RefresherState::Stopped)
            .await;
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.token.cancel();
        match self.join.take() {
            Some(join) => join.await.map_err(|err| IcyError::TaskJoin {
                role: "title refresher",
                details: err.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
