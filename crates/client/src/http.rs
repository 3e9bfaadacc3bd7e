//! [`SyncGateway`] over the hub's JSON API.

use std::time::Duration;

use irrigation_timers::{Interval, SyncFailure, SyncGateway, Timer, TimerId};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

pub const DEFAULT_API: &str = "http://127.0.0.1:8080/api/v1";

pub struct HttpGateway {
    client: reqwest::Client,
    base: String,
}

impl HttpGateway {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("irrigation-client/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        action: &str,
        request: RequestBuilder,
    ) -> Result<T, SyncFailure> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(action, &e))?;

        let status = response.status();
        debug!(action, %status, "hub responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(problem(action, status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(action, &e))
    }
}

/// The hub answered, but not with success.
fn problem(action: &str, status: StatusCode, body: &str) -> SyncFailure {
    let body = body.trim();
    let reason = if body.is_empty() {
        status.to_string()
    } else {
        body.to_string()
    };
    SyncFailure::new(format!("Problem {action}: {reason}"))
}

/// The request never produced a usable answer.
fn transport_error(action: &str, err: &reqwest::Error) -> SyncFailure {
    SyncFailure::new(format!("Error {action}: {err}"))
}

impl SyncGateway for HttpGateway {
    async fn list(&self) -> Result<Vec<Timer>, SyncFailure> {
        self.send("loading timers", self.client.get(self.url("timers")))
            .await
    }

    async fn create(&self, timer: Timer) -> Result<Timer, SyncFailure> {
        self.send("adding timer", self.client.post(self.url("timer")).json(&timer))
            .await
    }

    async fn update(&self, id: TimerId, timer: Timer) -> Result<Timer, SyncFailure> {
        let request = self.client.put(self.url(&format!("timer/{id}"))).json(&timer);
        self.send(&format!("updating timer {id}"), request).await
    }

    async fn delete(&self, id: TimerId) -> Result<(), SyncFailure> {
        let request = self.client.delete(self.url(&format!("timer/{id}")));
        let _: bool = self.send(&format!("removing timer {id}"), request).await?;
        Ok(())
    }

    async fn list_intervals(&self) -> Result<Vec<Interval>, SyncFailure> {
        self.send("loading intervals", self.client.get(self.url("intervals")))
            .await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
