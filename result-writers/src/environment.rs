// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort lookup of host and user identity.
//!
//! Identity is read from a prioritized list of environment variables, covering the conventions of
//! Windows, Linux and macOS. The first non-empty value wins. Callers decide on the placeholder to
//! use when nothing resolves, since that varies by report format.

use indexmap::IndexMap;

/// Environment variables consulted for the computer name, in order.
pub const COMPUTER_VARS: &[&str] = &["COMPUTERNAME", "HOSTNAME", "NAME", "HOST"];

/// Environment variables consulted for the user name, in order.
pub const USER_VARS: &[&str] = &["USERNAME", "LOGNAME", "USER"];

/// Environment variables consulted for the user domain, in order.
pub const DOMAIN_VARS: &[&str] = &["USERDOMAIN"];

/// A source of environment variables.
pub trait EnvVars {
    /// Returns the value of an environment variable, if it is set.
    fn var(&self, name: &str) -> Option<String>;

    /// Returns the first non-empty value among `names`.
    fn first_non_empty(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.var(name))
            .find(|value| !value.is_empty())
    }
}

/// The environment of the current process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvVars for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        // Values that aren't valid Unicode are treated as unset.
        std::env::var(name).ok()
    }
}

/// An environment backed by a map, used for tests and for callers that capture the environment
/// up front.
#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: IndexMap<String, String>,
}

impl MapEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvVars for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// The identity of the host and user a run happened on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostIdentity {
    /// The computer name, if it could be resolved.
    pub computer: Option<String>,
    /// The user name, if it could be resolved.
    pub user: Option<String>,
    /// The user's domain. Falls back to the computer name when no domain is set.
    pub domain: Option<String>,
}

impl HostIdentity {
    /// Resolves identity from the given environment.
    pub fn resolve(env: &impl EnvVars) -> Self {
        let computer = env.first_non_empty(COMPUTER_VARS);
        let user = env.first_non_empty(USER_VARS);
        let domain = env
            .first_non_empty(DOMAIN_VARS)
            .or_else(|| computer.clone());
        Self {
            computer,
            user,
            domain,
        }
    }

    /// Resolves identity from the environment of the current process.
    pub fn from_process() -> Self {
        Self::resolve(&ProcessEnv)
    }

    /// Returns the computer name, or `fallback` if it couldn't be resolved.
    pub fn computer_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.computer.as_deref().unwrap_or(fallback)
    }

    /// Returns the user name, or `fallback` if it couldn't be resolved.
    pub fn user_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.user.as_deref().unwrap_or(fallback)
    }

    /// Returns the domain, or `fallback` if neither a domain nor a computer name resolved.
    pub fn domain_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.domain.as_deref().unwrap_or(fallback)
    }
}
