//! Explicit context object threaded through the facade and managers.
//!
//! Replaces the source's process-global cache/event-processor singletons
//! (spec.md §9 "Singletons and globals" REDESIGN FLAG). Each [`Context`] is
//! independent, so tests can construct several in the same process without
//! cross-talk.

use crate::cache::Cache;
use crate::config::Config;
use crate::credentials::Credentials;
use crate::events::EventAggregator;
use crate::http::{SignedHttpClient, Transport};
use std::sync::Mutex;

pub struct Context {
    pub credentials: Credentials,
    pub config: Config,
    pub cache: Mutex<Cache>,
    pub http: SignedHttpClient,
    pub events: Mutex<EventAggregator>,
}

impl Context {
    pub fn new(credentials: Credentials, config: Config, transport: Box<dyn Transport>) -> Self {
        let http = SignedHttpClient::new(credentials.papi.clone(), credentials.sapi.clone(), transport)
            .with_verbose(config.logging.verbose);
        let events = EventAggregator::new(config.event_reporting.clone(), credentials.papi.clone());
        Context { credentials, config, cache: Mutex::new(Cache::new()), http, events: Mutex::new(events) }
    }

    #[cfg(feature = "http")]
    pub fn with_reqwest(credentials: Credentials, config: Config) -> Self {
        Self::new(credentials, config, Box::new(crate::http::ReqwestTransport::default()))
    }
}
