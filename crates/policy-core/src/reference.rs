//! Artifact reference parsing and canonicalization.
//!
//! References follow the Docker reference grammar:
//!
//! ```text
//! reference := [domain '/'] path [':' tag] ['@' digest]
//! domain    := host [':' port]
//! path      := component ('/' component)*
//! component := [a-z0-9]+ (('.' | '_' | '__' | '-'+) [a-z0-9]+)*
//! tag       := [A-Za-z0-9_][A-Za-z0-9_.-]{0,127}
//! ```
//!
//! [`canonicalize`] turns whatever the user typed into a fully qualified,
//! domain-bearing string suitable as a tag index key.

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::{Error, Result};

/// Domain assumed by the Docker grammar when none is given.
pub const PLACEHOLDER_DOMAIN: &str = "docker.io";

/// Tag injected when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

const LEGACY_PLACEHOLDER_DOMAIN: &str = "index.docker.io";
const PLACEHOLDER_REGISTRY_HOST: &str = "registry-1.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;
const TAG_LENGTH_MAX: usize = 128;

/// A parsed, normalized artifact reference.
///
/// # Examples
///
/// ```
/// use policy_core::Reference;
///
/// let reference = Reference::parse("opcr.io/acme/peoplefinder:1.0.0").unwrap();
/// assert_eq!(reference.domain(), "opcr.io");
/// assert_eq!(reference.path(), "acme/peoplefinder");
/// assert_eq!(reference.tag(), Some("1.0.0"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    /// Parses and normalizes a reference.
    ///
    /// A missing domain becomes [`PLACEHOLDER_DOMAIN`], and single-segment
    /// paths on that domain gain the `library/` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] when the input violates the grammar.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::invalid_reference(input, "reference is empty"));
        }
        if input.len() == 64 && input.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::invalid_reference(
                input,
                "cannot specify 64-byte hexadecimal strings",
            ));
        }

        let (name_and_tag, digest) = match input.rsplit_once('@') {
            Some((rest, digest)) => {
                let digest = Digest::parse(digest)
                    .map_err(|e| Error::invalid_reference(input, e.to_string()))?;
                (rest, Some(digest))
            }
            None => (input, None),
        };

        let slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[slash..].rfind(':') {
            Some(i) => {
                let split = slash + i;
                (&name_and_tag[..split], Some(&name_and_tag[split + 1..]))
            }
            None => (name_and_tag, None),
        };

        if let Some(tag) = tag {
            validate_tag(input, tag)?;
        }

        let (domain, path) = split_domain(name);
        validate_domain(input, &domain)?;
        validate_path(input, &path)?;

        if domain.len() + 1 + path.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(Error::invalid_reference(
                input,
                format!("repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters"),
            ));
        }

        Ok(Self {
            domain,
            path,
            tag: tag.map(ToString::to_string),
            digest,
        })
    }

    /// Returns the registry domain (host and optional port).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the repository path within the registry.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the digest, if any.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Returns `domain/path`.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Host to contact for this reference's registry API.
    #[must_use]
    pub fn registry_host(&self) -> &str {
        if self.domain == PLACEHOLDER_DOMAIN {
            PLACEHOLDER_REGISTRY_HOST
        } else {
            &self.domain
        }
    }

    /// The manifest object named on the wire: the digest when present,
    /// otherwise the tag (defaulting to `latest`).
    #[must_use]
    pub fn object(&self) -> String {
        self.digest.as_ref().map_or_else(
            || self.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            ToString::to_string,
        )
    }

    /// Returns the reference with `latest` injected when it names neither a
    /// tag nor a digest.
    #[must_use]
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() && self.digest.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }

    /// Returns the familiar (short) form: the placeholder domain and the
    /// `library/` prefix are elided.
    #[must_use]
    pub fn familiar(&self) -> String {
        let name = if self.domain == PLACEHOLDER_DOMAIN {
            match self.path.strip_prefix(OFFICIAL_REPO_PREFIX) {
                Some(short) if !short.contains('/') => short.to_string(),
                _ => self.path.clone(),
            }
        } else {
            format!("{}/{}", self.domain, self.path)
        };
        self.with_suffix(name)
    }

    fn with_suffix(&self, mut name: String) -> String {
        if let Some(tag) = &self.tag {
            name.push(':');
            name.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            name.push('@');
            name.push_str(&digest.to_string());
        }
        name
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.with_suffix(format!("{}/{}", self.domain, self.path)))
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Canonicalizes a user-supplied reference into a domain-bearing string.
///
/// - References without an explicit domain are moved to `default_domain`
///   (or the placeholder domain when `default_domain` is empty).
/// - An explicitly written placeholder domain is preserved.
/// - A missing tag defaults to `latest`.
///
/// The result is idempotent: canonicalizing a canonical reference returns it
/// unchanged.
///
/// # Examples
///
/// ```
/// use policy_core::canonicalize;
///
/// assert_eq!(canonicalize("foo/bar:baz", "opcr.io").unwrap(), "opcr.io/foo/bar:baz");
/// assert_eq!(
///     canonicalize("docker.io/foo/bar:baz", "opcr.io").unwrap(),
///     "docker.io/foo/bar:baz"
/// );
/// assert_eq!(canonicalize("foo/bar", "opcr.io").unwrap(), "opcr.io/foo/bar:latest");
/// ```
///
/// # Errors
///
/// Returns [`Error::InvalidReference`] if `user_ref`, or `user_ref` moved to
/// `default_domain`, does not parse.
pub fn canonicalize(user_ref: &str, default_domain: &str) -> Result<String> {
    let parsed = Reference::parse(user_ref)?.with_default_tag();

    if parsed.domain == PLACEHOLDER_DOMAIN && !names_domain(user_ref) {
        let domain = if default_domain.is_empty() {
            PLACEHOLDER_DOMAIN
        } else {
            default_domain
        };
        let combined = format!("{domain}/{}", parsed.familiar());
        let reparsed = Reference::parse(&combined).map_err(|e| {
            Error::invalid_reference(user_ref, format!("with default domain '{domain}': {e}"))
        })?;
        return Ok(render(&reparsed));
    }

    Ok(render(&parsed))
}

fn render(reference: &Reference) -> String {
    if reference.domain == PLACEHOLDER_DOMAIN {
        format!("{PLACEHOLDER_DOMAIN}/{}", reference.familiar())
    } else {
        reference.familiar()
    }
}

/// Docker's rule: the first path segment is a domain when it contains `.` or
/// `:`, is `localhost`, or has uppercase letters.
fn names_domain(name: &str) -> bool {
    name.split_once('/').is_some_and(|(first, _)| {
        first.contains(['.', ':'])
            || first == "localhost"
            || first.bytes().any(|b| b.is_ascii_uppercase())
    })
}

fn split_domain(name: &str) -> (String, String) {
    let (mut domain, mut path) = match name.split_once('/') {
        Some((first, rest)) if names_domain(name) => (first.to_string(), rest.to_string()),
        _ => (PLACEHOLDER_DOMAIN.to_string(), name.to_string()),
    };
    if domain == LEGACY_PLACEHOLDER_DOMAIN {
        domain = PLACEHOLDER_DOMAIN.to_string();
    }
    if domain == PLACEHOLDER_DOMAIN && !path.contains('/') {
        path = format!("{OFFICIAL_REPO_PREFIX}{path}");
    }
    (domain, path)
}

fn validate_domain(input: &str, domain: &str) -> Result<()> {
    let (host, port) = if let Some(rest) = domain.strip_prefix('[') {
        let (ipv6, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::invalid_reference(input, "unterminated IPv6 address"))?;
        if ipv6.is_empty() || !ipv6.bytes().all(|b| b.is_ascii_hexdigit() || b == b':') {
            return Err(Error::invalid_reference(input, "invalid IPv6 address"));
        }
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| Error::invalid_reference(input, "invalid domain"))?,
            ),
        };
        (None, port)
    } else {
        match domain.split_once(':') {
            Some((host, port)) => (Some(host), Some(port)),
            None => (Some(domain), None),
        }
    };

    if let Some(host) = host {
        let valid = !host.is_empty()
            && host.split('.').all(|label| {
                let bytes = label.as_bytes();
                !bytes.is_empty()
                    && bytes[0].is_ascii_alphanumeric()
                    && bytes[bytes.len() - 1].is_ascii_alphanumeric()
                    && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            });
        if !valid {
            return Err(Error::invalid_reference(input, "invalid domain"));
        }
    }

    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_reference(input, "invalid port"));
        }
    }

    Ok(())
}

fn validate_path(input: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::invalid_reference(input, "repository path is empty"));
    }
    if path.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(Error::invalid_reference(
            input,
            "repository name must be lowercase",
        ));
    }
    for component in path.split('/') {
        if !is_valid_component(component) {
            return Err(Error::invalid_reference(
                input,
                format!("invalid path component '{component}'"),
            ));
        }
    }
    Ok(())
}

/// `[a-z0-9]+(([._]|__|-+)[a-z0-9]+)*`
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if bytes.is_empty() || !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let ok = matches!(separator, "." | "_" | "__") || separator.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }
    true
}

fn validate_tag(input: &str, tag: &str) -> Result<()> {
    let bytes = tag.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= TAG_LENGTH_MAX
        && (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_reference(input, format!("invalid tag '{tag}'")))
    }
}
