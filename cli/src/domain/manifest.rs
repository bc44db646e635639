//! Deployment manifest: schema, reference resolution and fingerprinting.
//!
//! Pure functions only. The process environment is passed in as a lookup
//! closure so resolution stays deterministic under test.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use infrasync_common::ResourceInstance;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::ManifestError;
use crate::domain::state::StateRef;

static ENVIRONMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9][a-z0-9-]{0,30}$").expect("valid regex")
});

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,127}$").expect("valid regex")
});

static KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex")
});

/// Name fragments that mark a variable as a secret.
const SECRET_MARKERS: &[&str] = &["password", "secret", "token", "credential"];

// ── Schema ────────────────────────────────────────────────────────────────────

/// `deployment.yaml` as written by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentManifest {
    /// Environment name, e.g. `dev` or `prod`.
    pub environment: String,
    /// Where this environment's state lives.
    pub backend: BackendSpec,
    /// Plain key/value inputs: location, naming prefix, address spaces...
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Remote state location. `key` defaults to `<environment>.tfstate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSpec {
    pub storage_account: String,
    pub container: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

// ── Resolved form ─────────────────────────────────────────────────────────────

/// SHA-256 over the canonical encoding of a resolved manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A manifest with every reference substituted and its fingerprint computed.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub environment: String,
    pub state_ref: StateRef,
    pub variables: BTreeMap<String, String>,
    pub resources: BTreeMap<String, ResourceInstance>,
    pub outputs: BTreeMap<String, String>,
    /// `address.property` (and `output.NAME`) entries whose values came from
    /// the environment and must never be displayed.
    pub sensitive: BTreeSet<String>,
    pub fingerprint: Fingerprint,
}

#[derive(Serialize)]
struct CanonicalManifest<'a> {
    environment: &'a str,
    state: String,
    variables: &'a BTreeMap<String, String>,
    resources: &'a BTreeMap<String, ResourceInstance>,
    outputs: &'a BTreeMap<String, String>,
}

impl DeploymentManifest {
    /// Where this environment's state lives. Needs no reference resolution.
    ///
    /// # Errors
    ///
    /// Returns a state reference error if the backend block is malformed.
    pub fn state_ref(&self) -> Result<StateRef> {
        let key = self
            .backend
            .key
            .clone()
            .unwrap_or_else(|| format!("{}.tfstate", self.environment));
        StateRef::new(&self.backend.storage_account, &self.backend.container, &key)
    }

    /// Validate the manifest and substitute `${var.NAME}` / `${env.NAME}`.
    ///
    /// `env` looks up process environment variables; secrets reach the
    /// manifest only through it.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] (or a state reference error) describing the
    /// first problem found.
    pub fn resolve(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<ResolvedManifest> {
        if !ENVIRONMENT_RE.is_match(&self.environment) {
            return Err(ManifestError::InvalidEnvironment(self.environment.clone()).into());
        }
        let state_ref = self.state_ref()?;

        let mut sensitive_vars = BTreeSet::new();
        let mut variables = BTreeMap::new();
        for (name, raw) in &self.variables {
            check_secret_literal(name, raw)?;
            let at = format!("variable '{name}'");
            let (value, sensitive) = interpolate(raw, &at, &Scope::Variables { env })?;
            if sensitive {
                sensitive_vars.insert(name.clone());
            }
            variables.insert(name.clone(), value);
        }

        let scope = Scope::Properties {
            variables: &variables,
            sensitive_vars: &sensitive_vars,
            env,
        };
        let mut sensitive = BTreeSet::new();
        let mut resources = BTreeMap::new();
        for (address, spec) in &self.resources {
            if !ADDRESS_RE.is_match(address) {
                return Err(ManifestError::InvalidAddress(address.clone()).into());
            }
            if !KIND_RE.is_match(&spec.kind) {
                return Err(ManifestError::InvalidKind {
                    address: address.clone(),
                    kind: spec.kind.clone(),
                }
                .into());
            }
            let mut properties = BTreeMap::new();
            for (prop, raw) in &spec.properties {
                let at = format!("{address}.{prop}");
                let (value, is_sensitive) = interpolate(raw, &at, &scope)?;
                check_secret_source(prop, raw, is_sensitive, &at)?;
                if is_sensitive {
                    sensitive.insert(at);
                }
                properties.insert(prop.clone(), value);
            }
            resources.insert(
                address.clone(),
                ResourceInstance {
                    kind: spec.kind.clone(),
                    properties,
                },
            );
        }

        let mut outputs = BTreeMap::new();
        for (name, raw) in &self.outputs {
            let at = format!("output.{name}");
            let (value, is_sensitive) = interpolate(raw, &at, &scope)?;
            check_secret_source(name, raw, is_sensitive, &at)?;
            if is_sensitive {
                sensitive.insert(at);
            }
            outputs.insert(name.clone(), value);
        }

        let fingerprint = fingerprint(&self.environment, &state_ref, &variables, &resources, &outputs)?;

        Ok(ResolvedManifest {
            environment: self.environment.clone(),
            state_ref,
            variables,
            resources,
            outputs,
            sensitive,
            fingerprint,
        })
    }
}

/// Compute the configuration fingerprint.
///
/// Every map is a `BTreeMap`, so the JSON encoding is key-ordered and stable.
fn fingerprint(
    environment: &str,
    state_ref: &StateRef,
    variables: &BTreeMap<String, String>,
    resources: &BTreeMap<String, ResourceInstance>,
    outputs: &BTreeMap<String, String>,
) -> Result<Fingerprint> {
    let canonical = CanonicalManifest {
        environment,
        state: state_ref.to_string(),
        variables,
        resources,
        outputs,
    };
    let bytes = serde_json::to_vec(&canonical).context("encoding manifest for fingerprint")?;
    Ok(Fingerprint(sha256_hex(&bytes)))
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

/// Encode bytes as lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}

// ── Secrets ───────────────────────────────────────────────────────────────────

/// Whether a variable name marks a secret value.
#[must_use]
pub fn is_secret_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
        || lower.ends_with("_key")
        || lower == "key"
}

/// Secret-named variables must be a single `${env.NAME}` reference.
fn check_secret_literal(name: &str, raw: &str) -> Result<(), ManifestError> {
    if !is_secret_name(name) || raw.is_empty() {
        return Ok(());
    }
    let is_env_ref = raw
        .strip_prefix("${env.")
        .and_then(|rest| rest.strip_suffix('}'))
        .is_some_and(|var| !var.is_empty() && !var.contains('}'));
    if is_env_ref {
        Ok(())
    } else {
        Err(ManifestError::EmbeddedSecret(name.to_string()))
    }
}

/// Secret-named properties and outputs must take their value from the
/// environment, directly or through an environment-backed variable.
fn check_secret_source(
    name: &str,
    raw: &str,
    from_env: bool,
    at: &str,
) -> Result<(), ManifestError> {
    if is_secret_name(name) && !raw.is_empty() && !from_env {
        return Err(ManifestError::EmbeddedSecret(at.to_string()));
    }
    Ok(())
}

// ── Interpolation ─────────────────────────────────────────────────────────────

enum Scope<'a> {
    /// Variables may only reference the environment.
    Variables {
        env: &'a dyn Fn(&str) -> Option<String>,
    },
    /// Properties and outputs may reference variables and the environment.
    Properties {
        variables: &'a BTreeMap<String, String>,
        sensitive_vars: &'a BTreeSet<String>,
        env: &'a dyn Fn(&str) -> Option<String>,
    },
}

impl Scope<'_> {
    fn lookup(&self, reference: &str, at: &str) -> Result<(String, bool), ManifestError> {
        let unsupported = || ManifestError::UnsupportedReference {
            reference: reference.to_string(),
            at: at.to_string(),
        };
        let (namespace, name) = reference.split_once('.').ok_or_else(unsupported)?;
        match (namespace, self) {
            ("env", Scope::Variables { env } | Scope::Properties { env, .. }) => env(name)
                .map(|v| (v, true))
                .ok_or_else(|| ManifestError::UndefinedEnv {
                    name: name.to_string(),
                    at: at.to_string(),
                }),
            (
                "var",
                Scope::Properties {
                    variables,
                    sensitive_vars,
                    ..
                },
            ) => variables
                .get(name)
                .map(|v| (v.clone(), sensitive_vars.contains(name)))
                .ok_or_else(|| ManifestError::UndefinedVariable {
                    name: name.to_string(),
                    at: at.to_string(),
                }),
            _ => Err(unsupported()),
        }
    }
}

/// Substitute `${ns.NAME}` references. `$${` produces a literal `${`.
///
/// Returns the resolved string and whether any substituted value was
/// sensitive.
fn interpolate(raw: &str, at: &str, scope: &Scope<'_>) -> Result<(String, bool), ManifestError> {
    let mut out = String::with_capacity(raw.len());
    let mut sensitive = false;
    let mut rest = raw;
    while let Some(pos) = rest.find("${") {
        if rest[..pos].ends_with('$') {
            out.push_str(&rest[..pos - 1]);
            out.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after.find('}').ok_or_else(|| ManifestError::UnterminatedReference {
            at: at.to_string(),
        })?;
        let (value, is_sensitive) = scope.lookup(after[..end].trim(), at)?;
        sensitive |= is_sensitive;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok((out, sensitive))
}
