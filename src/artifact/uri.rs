//! Artifact URIs: `scheme://authority/path`

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A parsed artifact URI.
///
/// Bare paths (no scheme) are treated as `file` URIs. Schemes without an
/// authority (`runs:/id/path`) keep an empty authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactUri {
    scheme: String,
    authority: Option<String>,
    path: String,
}

impl ArtifactUri {
    /// Parse a URI or bare filesystem path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty input or a malformed scheme.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::invalid_argument("uri", "artifact URI must not be empty"));
        }
        let Some((scheme, rest)) = split_scheme(input) else {
            return Ok(Self {
                scheme: "file".to_string(),
                authority: None,
                path: input.to_string(),
            });
        };
        let scheme = scheme.to_ascii_lowercase();
        match rest.strip_prefix("//") {
            Some(after) => {
                let (authority, path) = after
                    .find('/')
                    .map_or((after, ""), |i| (&after[..i], &after[i..]));
                Ok(Self {
                    scheme,
                    authority: Some(authority.to_string()),
                    path: path.to_string(),
                })
            }
            None => Ok(Self {
                scheme,
                authority: None,
                path: rest.to_string(),
            }),
        }
    }

    /// Lowercased scheme, used for backend lookup.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Authority (host, bucket, namespace); empty if absent.
    #[must_use]
    pub fn authority(&self) -> &str {
        self.authority.as_deref().unwrap_or_default()
    }

    /// Path component, as written.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A URI for `child` below this one.
    #[must_use]
    pub fn join(&self, child: &str) -> Self {
        let child = child.trim_matches('/');
        if child.is_empty() {
            return self.clone();
        }
        let path = if self.path.is_empty() {
            format!("/{child}")
        } else {
            format!("{}/{child}", self.path.trim_end_matches('/'))
        };
        Self {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path,
        }
    }
}

fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    let scheme = &input[..colon];
    // single letters are Windows drive letters, not schemes
    let valid = scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| (scheme, &input[colon + 1..]))
}

impl FromStr for ArtifactUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.authority {
            Some(authority) => write!(f, "{}://{authority}{}", self.scheme, self.path),
            None => write!(f, "{}:{}", self.scheme, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_authority() {
        let uri = ArtifactUri::parse("S3://bucket/exp/1/artifacts").unwrap();
        assert_eq!(uri.scheme(), "s3");
        assert_eq!(uri.authority(), "bucket");
        assert_eq!(uri.path(), "/exp/1/artifacts");
        assert_eq!(uri.to_string(), "s3://bucket/exp/1/artifacts");
    }

    #[test]
    fn test_parse_file_uri_and_bare_path() {
        let uri = ArtifactUri::parse("file:///tmp/mlruns").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.authority(), "");
        assert_eq!(uri.path(), "/tmp/mlruns");

        let bare = ArtifactUri::parse("/tmp/mlruns").unwrap();
        assert_eq!(bare.scheme(), "file");
        assert_eq!(bare.path(), "/tmp/mlruns");

        let drive = ArtifactUri::parse("C:/mlruns").unwrap();
        assert_eq!(drive.scheme(), "file");
    }

    #[test]
    fn test_parse_without_authority() {
        let uri = ArtifactUri::parse("runs:/abc123/model").unwrap();
        assert_eq!(uri.scheme(), "runs");
        assert_eq!(uri.path(), "/abc123/model");
        assert_eq!(uri.to_string(), "runs:/abc123/model");
    }

    #[test]
    fn test_join() {
        let uri = ArtifactUri::parse("memory://mlruns/0").unwrap();
        assert_eq!(uri.join("run/artifacts/").to_string(), "memory://mlruns/0/run/artifacts");
        let bare = ArtifactUri::parse("memory://ns").unwrap();
        assert_eq!(bare.join("x").to_string(), "memory://ns/x");
    }

    #[test]
    fn test_parse_empty() {
        assert!(ArtifactUri::parse("  ").is_err());
    }
}
