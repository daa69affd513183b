//! Endpoint resolution from caller-supplied identifiers.

use std::collections::HashSet;

use omnicall_config::{NicknameTable, same_authority};
use thiserror::Error;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::errors::ResolveError;

const RESOLVE_TARGET: &str = "omnicall::resolve";

/// Aggregate listed by a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Aggregate URN.
    pub urn: String,
    /// Aggregate URL.
    pub url: String,
}

/// Error raised by an [`AggregateRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RegistryError {
    message: String,
}

impl RegistryError {
    /// Builds a registry error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Remote directory of known aggregates.
pub trait AggregateRegistry: Send + Sync {
    /// Lists every aggregate the registry knows.
    fn list_aggregates(&self) -> Result<Vec<RegistryEntry>, RegistryError>;
}

/// Turns identifiers into a de-duplicated, ordered endpoint list.
///
/// An identifier is a URL, a configured nickname, or a URN matching a
/// nickname or registry entry. With no identifiers the configured defaults
/// are used, then the registry.
pub struct EndpointResolver<'a> {
    nicknames: &'a NicknameTable,
    defaults: &'a [String],
    registry: Option<&'a dyn AggregateRegistry>,
}

impl<'a> EndpointResolver<'a> {
    /// Creates a resolver over the nickname table and default identifiers.
    #[must_use]
    pub const fn new(nicknames: &'a NicknameTable, defaults: &'a [String]) -> Self {
        Self {
            nicknames,
            defaults,
            registry: None,
        }
    }

    /// Consults `registry` for URNs and when nothing else names an aggregate.
    #[must_use]
    pub const fn with_registry(mut self, registry: &'a dyn AggregateRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolves `identifiers`, keeping the first occurrence of each URL.
    pub fn resolve(&self, identifiers: &[String]) -> Result<Vec<Endpoint>, ResolveError> {
        let mut listing = None;
        let resolved = if !identifiers.is_empty() {
            self.resolve_all(identifiers, &mut listing)?
        } else if !self.defaults.is_empty() {
            debug!(target: RESOLVE_TARGET, count = self.defaults.len(), "using default aggregates");
            self.resolve_all(self.defaults, &mut listing)?
        } else {
            self.registry_listing(&mut listing)?
                .iter()
                .map(|entry| self.endpoint_for_url(&entry.urn, &entry.url))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(resolved.len());
        for endpoint in resolved {
            if seen.insert(endpoint.url().to_owned()) {
                endpoints.push(endpoint);
            } else {
                debug!(target: RESOLVE_TARGET, url = endpoint.url(), "dropping duplicate aggregate");
            }
        }
        if endpoints.is_empty() {
            return Err(ResolveError::NoAggregates);
        }
        Ok(endpoints)
    }

    fn resolve_all(
        &self,
        identifiers: &[String],
        listing: &mut Option<Vec<RegistryEntry>>,
    ) -> Result<Vec<Endpoint>, ResolveError> {
        identifiers
            .iter()
            .map(|identifier| self.resolve_one(identifier.trim(), listing))
            .collect()
    }

    fn resolve_one(
        &self,
        identifier: &str,
        listing: &mut Option<Vec<RegistryEntry>>,
    ) -> Result<Endpoint, ResolveError> {
        if identifier.contains("://") {
            return self.endpoint_for_url("", identifier);
        }
        if let Some(entry) = self.nicknames.lookup(identifier) {
            return Ok(Endpoint::new(entry.urn.as_str(), &entry.url)?.with_nickname(identifier));
        }
        if !identifier.starts_with("urn:") {
            return Err(ResolveError::UnknownAggregate(identifier.to_owned()));
        }
        if let Some((nickname, entry)) = self.nicknames.find_by_urn(identifier) {
            return Ok(Endpoint::new(entry.urn.as_str(), &entry.url)?.with_nickname(nickname));
        }
        if self.registry.is_none() {
            return Err(ResolveError::UnknownAggregate(identifier.to_owned()));
        }
        let found = self
            .registry_listing(listing)?
            .iter()
            .find(|entry| same_authority(&entry.urn, identifier))
            .cloned();
        let Some(entry) = found else {
            return Err(ResolveError::UnknownAggregate(identifier.to_owned()));
        };
        self.endpoint_for_url(&entry.urn, &entry.url)
    }

    /// Endpoint for a URL, borrowing URN and nickname from the table.
    fn endpoint_for_url(&self, urn: &str, url: &str) -> Result<Endpoint, ResolveError> {
        let endpoint = Endpoint::new(urn, url)?;
        let Some((nickname, entry)) = self.nicknames.find_by_url(endpoint.url()) else {
            return Ok(endpoint);
        };
        let effective_urn = if urn.trim().is_empty() {
            entry.urn.as_str()
        } else {
            urn
        };
        Ok(Endpoint::new(effective_urn, endpoint.url())?.with_nickname(nickname))
    }

    fn registry_listing<'l>(
        &self,
        listing: &'l mut Option<Vec<RegistryEntry>>,
    ) -> Result<&'l [RegistryEntry], ResolveError> {
        if listing.is_none() {
            let Some(registry) = self.registry else {
                return Err(ResolveError::NoAggregates);
            };
            let entries = registry
                .list_aggregates()
                .map_err(|error| ResolveError::Registry(error.to_string()))?;
            debug!(target: RESOLVE_TARGET, count = entries.len(), "fetched aggregate registry");
            *listing = Some(entries);
        }
        Ok(listing.as_deref().unwrap_or_default())
    }
}
