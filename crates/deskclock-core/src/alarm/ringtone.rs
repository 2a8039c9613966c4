use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Ringtone reference stored on alarms and instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "uri")]
pub enum Ringtone {
    Silent,
    Default,
    /// Sentinel resolved to a concrete ringtone when the alarm fires.
    Random,
    Uri(String),
}

impl Ringtone {
    pub fn is_random(&self) -> bool {
        matches!(self, Ringtone::Random)
    }

    /// Storage form: `silent`, `default`, `random`, or the URI itself.
    pub fn as_stored(&self) -> &str {
        match self {
            Ringtone::Silent => "silent",
            Ringtone::Default => "default",
            Ringtone::Random => "random",
            Ringtone::Uri(uri) => uri,
        }
    }

    /// False for values that would load back as a sentinel.
    pub fn is_storable_uri(uri: &str) -> bool {
        matches!(Ringtone::from_stored(uri), Ringtone::Uri(_))
    }

    pub fn from_stored(value: &str) -> Self {
        match value {
            "silent" => Ringtone::Silent,
            "" | "default" => Ringtone::Default,
            "random" => Ringtone::Random,
            uri => Ringtone::Uri(uri.to_string()),
        }
    }
}

impl Default for Ringtone {
    fn default() -> Self {
        Ringtone::Default
    }
}

impl fmt::Display for Ringtone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_stored())
    }
}

/// Picks a concrete ringtone for the random sentinel.
pub trait RingtoneResolver: Send + Sync {
    fn resolve_random(&self) -> Ringtone;
}

/// Uniform choice from a fixed library of ringtone URIs.
#[derive(Debug, Clone, Default)]
pub struct LibraryResolver {
    library: Vec<String>,
    fallback: Option<String>,
}

impl LibraryResolver {
    /// Entries spelled like a sentinel are dropped.
    pub fn new(library: Vec<String>, fallback: Option<String>) -> Self {
        let library = library
            .into_iter()
            .filter(|uri| Ringtone::is_storable_uri(uri))
            .collect();
        let fallback = fallback.filter(|uri| Ringtone::is_storable_uri(uri));
        Self { library, fallback }
    }
}

impl RingtoneResolver for LibraryResolver {
    fn resolve_random(&self) -> Ringtone {
        let mut rng = rand::thread_rng();
        match self.library.choose(&mut rng).or(self.fallback.as_ref()) {
            Some(uri) => Ringtone::Uri(uri.clone()),
            None => Ringtone::Default,
        }
    }
}
