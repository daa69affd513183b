//! Scripted in-memory transport that records every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use omnicall_config::canonical_url;
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::probe::GET_VERSION_METHOD;
use crate::transport::{CallContext, Transport, TransportError};

/// Error text returned for endpoints with no scripted reply.
pub const UNSCRIPTED_ERROR: &str = "[Errno 111] Connection refused";

/// One call observed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Canonical URL called.
    pub url: String,
    /// Wire method name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

#[derive(Default)]
struct Script {
    replies: HashMap<(String, String), Result<Value, String>>,
    fallbacks: HashMap<String, Value>,
    calls: Vec<RecordedCall>,
}

/// Transport answering from per-URL, per-method scripts.
///
/// Clones share one script and one call log, so a test can keep a handle
/// after moving a clone into an orchestrator.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

fn key(url: &str) -> String {
    canonical_url(url).unwrap_or_else(|reason| panic!("test URL {url} is invalid: {reason}"))
}

impl ScriptedTransport {
    /// Creates an empty script; every call fails as a refused connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the GetVersion reply for `url`.
    pub fn version(&self, url: &str, reply: Value) {
        self.reply(url, GET_VERSION_METHOD, reply);
    }

    /// Scripts the reply to `method` at `url`.
    pub fn reply(&self, url: &str, method: &str, reply: Value) {
        self.lock()
            .replies
            .insert((key(url), method.to_owned()), Ok(reply));
    }

    /// Scripts a transport failure for `method` at `url`.
    pub fn fail(&self, url: &str, method: &str, message: &str) {
        self.lock()
            .replies
            .insert((key(url), method.to_owned()), Err(message.to_owned()));
    }

    /// Scripts the reply for every unscripted non-GetVersion method at `url`.
    pub fn answer_everything(&self, url: &str, reply: Value) {
        self.lock().fallbacks.insert(key(url), reply);
    }

    /// Every call seen so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls to `method` at `url`.
    #[must_use]
    pub fn count(&self, url: &str, method: &str) -> usize {
        let url = key(url);
        self.lock()
            .calls
            .iter()
            .filter(|call| call.url == url && call.method == method)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn invoke(
        &self,
        endpoint: &Endpoint,
        method: &str,
        args: &[Value],
        _context: &CallContext<'_>,
    ) -> Result<Value, TransportError> {
        let mut script = self.lock();
        script.calls.push(RecordedCall {
            url: endpoint.url().to_owned(),
            method: method.to_owned(),
            args: args.to_vec(),
        });
        let scripted = script
            .replies
            .get(&(endpoint.url().to_owned(), method.to_owned()))
            .cloned();
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(TransportError::new(message)),
            None if method != GET_VERSION_METHOD => script
                .fallbacks
                .get(endpoint.url())
                .cloned()
                .ok_or_else(|| TransportError::new(UNSCRIPTED_ERROR)),
            None => Err(TransportError::new(UNSCRIPTED_ERROR)),
        }
    }
}
