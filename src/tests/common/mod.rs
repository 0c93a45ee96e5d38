// tests/common/mod.rs
pub use axum::Router;
pub use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tokio::sync::Semaphore;

use crate::cache::token::AccessToken;
use crate::parameter::{Parameter, ParameterSet};
use crate::resource::Resource;
use crate::sources::fetch::ResourceFetcher;

pub static SECRET_ID: Lazy<Parameter<String>> = Lazy::new(|| Parameter::required("secretId"));
pub static REGION: Lazy<Parameter<String>> =
    Lazy::new(|| Parameter::optional("region").with_default("us-east-1".to_string()));
pub static API_KEY: Lazy<Parameter<String>> =
    Lazy::new(|| Parameter::optional("apiKey").sensitive());

pub fn secret_params(secret_id: &str) -> ParameterSet {
    ParameterSet::builder()
        .add(&SECRET_ID, secret_id.to_string())
        .build()
}

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

/// Secret fetcher that counts invocations. With a gate, every fetch waits for
/// one permit before completing.
#[derive(Clone, Default)]
pub struct CountingFetcher {
    pub calls: Arc<AtomicUsize>,
    pub gate: Option<Arc<Semaphore>>,
    pub fail: bool,
}

impl CountingFetcher {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self { gate: Some(gate.clone()), ..Self::default() };
        (fetcher, gate)
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceFetcher<String> for CountingFetcher {
    async fn fetch(&self, parameters: &ParameterSet) -> Result<Resource<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let secret_id = parameters.get_required(&SECRET_ID)?;
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.fail {
            return Err(anyhow!("secret manager unavailable"));
        }
        Ok(Resource::permanent(format!("{secret_id}-v{call}"), true))
    }
}

/// Token fetcher replaying a script of `Ok((value, lifetime_secs))` / `Err(message)`
/// entries; fails once the script is exhausted.
#[derive(Clone, Default)]
pub struct ScriptedTokenFetcher {
    pub calls: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<std::result::Result<(&'static str, u64), &'static str>>>>,
}

impl ScriptedTokenFetcher {
    pub fn new(script: Vec<std::result::Result<(&'static str, u64), &'static str>>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(Mutex::new(script.into())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceFetcher<AccessToken> for ScriptedTokenFetcher {
    async fn fetch(&self, _parameters: &ParameterSet) -> Result<Resource<AccessToken>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok((value, lifetime))) => {
                Ok(AccessToken::expiring_in(value, Duration::from_secs(lifetime)).into_resource())
            }
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("token script exhausted")),
        }
    }
}
