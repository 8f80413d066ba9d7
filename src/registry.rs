//! Read-only view of the deployed-resource manifest.
//!
//! The manifest is a flat JSON object written by the provisioning step, for
//! example:
//!
//! ```json
//! {
//!   "DatabaseEndpoint": "db.internal",
//!   "DatabasePort": "5432",
//!   "RedisEndpoint": "cache.internal",
//!   "NlbDnsName": "lb-123.elb.amazonaws.com",
//!   "LambdaFunction0Arn": "arn:aws:lambda:us-east-1:123:function:ingest",
//!   "Region": "us-east-1"
//! }
//! ```
//!
//! Loading never fails: a missing or malformed file produces an empty
//! registry and every getter returns `None`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

pub const KEY_DATABASE_ENDPOINT: &str = "DatabaseEndpoint";
pub const KEY_DATABASE_PORT: &str = "DatabasePort";
pub const KEY_DATABASE_NAME: &str = "DatabaseName";
pub const KEY_DATABASE_SECRET: &str = "DatabaseSecretArn";
pub const KEY_CACHE_ENDPOINT: &str = "RedisEndpoint";
pub const KEY_CACHE_PORT: &str = "RedisPort";
pub const KEY_HTTP_HOST: &str = "NlbDnsName";
pub const KEY_REGION: &str = "Region";

const FUNCTION_KEY_PREFIX: &str = "LambdaFunction";
const FUNCTION_KEY_SUFFIX: &str = "Arn";
const FUNCTION_ARN_MARKER: &str = "function:";

/// Flat key/value registry of deployed endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRegistry {
    entries: HashMap<String, String>,
}

impl EndpointRegistry {
    /// Load the manifest at `path`.
    ///
    /// Returns an empty registry (and logs why) when the file is missing or
    /// is not a JSON object.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let registry = Self::from_json_str(&content);
                debug!(path = %path.display(), keys = registry.len(), "Loaded manifest");
                registry
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Manifest unreadable, using empty registry");
                Self::default()
            }
        }
    }

    /// Parse a manifest from a JSON string.
    ///
    /// Strings are stored as-is; numbers and booleans in their JSON text
    /// form. Nulls, arrays and nested objects are skipped.
    pub fn from_json_str(content: &str) -> Self {
        let object = match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                warn!("Manifest is not a JSON object, using empty registry");
                return Self::default();
            }
            Err(err) => {
                warn!(error = %err, "Manifest is not valid JSON, using empty registry");
                return Self::default();
            }
        };

        let entries = object
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                Value::Bool(b) => Some((key, b.to_string())),
                Value::Null | Value::Array(_) | Value::Object(_) => None,
            })
            .collect();
        Self { entries }
    }

    /// Build a registry directly from key/value pairs.
    pub fn from_map<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `key`, if present.
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `default` when absent.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_opt(key).unwrap_or(default)
    }

    pub fn database_endpoint(&self) -> Option<&str> {
        self.get_opt(KEY_DATABASE_ENDPOINT)
    }

    pub fn database_port(&self) -> Option<&str> {
        self.get_opt(KEY_DATABASE_PORT)
    }

    pub fn database_name(&self) -> Option<&str> {
        self.get_opt(KEY_DATABASE_NAME)
    }

    pub fn database_secret_ref(&self) -> Option<&str> {
        self.get_opt(KEY_DATABASE_SECRET)
    }

    pub fn cache_endpoint(&self) -> Option<&str> {
        self.get_opt(KEY_CACHE_ENDPOINT)
    }

    pub fn cache_port(&self) -> Option<&str> {
        self.get_opt(KEY_CACHE_PORT)
    }

    pub fn http_host(&self) -> Option<&str> {
        self.get_opt(KEY_HTTP_HOST)
    }

    pub fn region(&self) -> Option<&str> {
        self.get_opt(KEY_REGION)
    }

    /// Collect function names from every `LambdaFunction<N>Arn` key.
    ///
    /// `N` need not be contiguous. The name is the segment after
    /// `function:` with any `:qualifier` removed; ARNs without that segment
    /// are ignored.
    pub fn function_names(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(key, _)| is_function_key(key))
            .filter_map(|(_, arn)| function_name_from_arn(arn))
            .map(str::to_string)
            .collect()
    }
}

fn is_function_key(key: &str) -> bool {
    key.strip_prefix(FUNCTION_KEY_PREFIX)
        .and_then(|rest| rest.strip_suffix(FUNCTION_KEY_SUFFIX))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

/// Extract `NAME` from `arn:...:function:NAME[:QUALIFIER]`.
pub fn function_name_from_arn(arn: &str) -> Option<&str> {
    let (_, tail) = arn.split_once(FUNCTION_ARN_MARKER)?;
    let name = tail.split(':').next().unwrap_or_default();
    (!name.is_empty()).then_some(name)
}
