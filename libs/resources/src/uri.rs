// Copyright 2026 Glacier Engine contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resource references: `scheme://host/path[#fragment]`, plus the special
//! `urn:<path>` form that matches resources by name across providers.

use core::fmt;
use core::ops::Range;

pub const SCHEME_FILE: &str = "file";
pub const SCHEME_DIR: &str = "dir";
pub const SCHEME_DYNLIB: &str = "dynlib";
pub const SCHEME_URN: &str = "urn";

/// A parsed resource reference.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    raw: String,
    scheme: Range<usize>,
    host: Range<usize>,
    path: Range<usize>,
    fragment: Option<Range<usize>>,
}

impl Uri {
    /// Parses a URI of the form `scheme://host/path[#fragment]` or
    /// `urn:path`. Returns `None` when no scheme separator is present.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let colon = raw.find(':')?;
        let scheme = 0..colon;

        let (host, path_start) = if raw[colon..].starts_with("://") {
            let authority_start = colon + 3;
            let rest = &raw[authority_start..];
            match rest.find('/') {
                Some(slash) => (
                    authority_start..authority_start + slash,
                    authority_start + slash + 1,
                ),
                None => (authority_start..raw.len(), raw.len()),
            }
        } else {
            // `urn:`-style: everything after the colon is the path.
            (colon..colon, colon + 1)
        };

        let (path_end, fragment) = match raw[path_start..].find('#') {
            Some(hash) => {
                let at = path_start + hash;
                (at, Some(at + 1..raw.len()))
            }
            None => (raw.len(), None),
        };

        Some(Self {
            raw: raw.to_owned(),
            scheme,
            host,
            path: path_start..path_end,
            fragment,
        })
    }

    /// Builds a URI from parts; `host` may be empty.
    #[must_use]
    pub fn from_parts(scheme: &str, host: &str, path: &str) -> Self {
        let raw = if scheme == SCHEME_URN {
            format!("{scheme}:{path}")
        } else {
            format!("{scheme}://{host}/{path}")
        };
        Self::parse(&raw).expect("constructed uri always parses")
    }

    /// A name-only reference, matched against resource names across
    /// providers.
    #[must_use]
    pub fn urn(name: &str) -> Self {
        Self::from_parts(SCHEME_URN, "", name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[self.scheme.clone()]
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.raw[self.host.clone()]
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.raw[self.path.clone()]
    }

    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.clone().map(|r| &self.raw[r])
    }

    #[must_use]
    pub fn is_urn(&self) -> bool {
        self.scheme() == SCHEME_URN
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({})", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_form() {
        let uri = Uri::parse("file://packs/cotton/tilemap.tmx#layer0").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.host(), "packs");
        assert_eq!(uri.path(), "cotton/tilemap.tmx");
        assert_eq!(uri.fragment(), Some("layer0"));
    }

    #[test]
    fn parses_empty_host() {
        let uri = Uri::parse("file:///textures/atlas.png").unwrap();
        assert_eq!(uri.host(), "");
        assert_eq!(uri.path(), "textures/atlas.png");
        assert_eq!(uri.fragment(), None);
    }

    #[test]
    fn parses_urn_form() {
        let uri = Uri::urn("cotton/tilemap.tmx");
        assert!(uri.is_urn());
        assert_eq!(uri.path(), "cotton/tilemap.tmx");
        assert_eq!(uri.host(), "");
        assert_eq!(uri.as_str(), "urn:cotton/tilemap.tmx");
    }

    #[test]
    fn from_parts_roundtrips() {
        let uri = Uri::from_parts("dynlib", "", "glacier_render");
        assert_eq!(uri.scheme(), "dynlib");
        assert_eq!(uri.path(), "glacier_render");
    }

    #[test]
    fn rejects_schemeless_strings() {
        assert!(Uri::parse("just/a/path").is_none());
    }
}
