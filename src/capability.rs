//! Which backend drivers this build can actually use.
//!
//! Drivers are optional cargo features. [`Capabilities::probe`] reads them
//! once at startup; the CLI can then switch individual backends off with
//! [`Capabilities::without`]. Generator constructors only ever see the
//! resulting boolean.

use crate::backend::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub sql: bool,
    pub cache: bool,
    pub function: bool,
    pub http: bool,
}

impl Capabilities {
    /// Capabilities compiled into this binary.
    pub fn probe() -> Self {
        Self {
            sql: cfg!(feature = "postgres"),
            cache: cfg!(feature = "redis"),
            function: cfg!(feature = "lambda"),
            http: cfg!(feature = "http"),
        }
    }

    /// No backend available. Every generator built from this is inert.
    pub fn none() -> Self {
        Self {
            sql: false,
            cache: false,
            function: false,
            http: false,
        }
    }

    /// Returns a copy with `kind` switched off.
    pub fn without(mut self, kind: BackendKind) -> Self {
        match kind {
            BackendKind::Sql => self.sql = false,
            BackendKind::Cache => self.cache = false,
            BackendKind::Function => self.function = false,
            BackendKind::Http => self.http = false,
        }
        self
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Sql => self.sql,
            BackendKind::Cache => self.cache,
            BackendKind::Function => self.function,
            BackendKind::Http => self.http,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_supports_nothing() {
        let caps = Capabilities::none();
        for kind in BackendKind::ALL {
            assert!(!caps.supports(kind));
        }
    }

    #[test]
    fn test_without_only_clears_one() {
        let caps = Capabilities {
            sql: true,
            cache: true,
            function: true,
            http: true,
        }
        .without(BackendKind::Cache);

        assert!(caps.supports(BackendKind::Sql));
        assert!(!caps.supports(BackendKind::Cache));
        assert!(caps.supports(BackendKind::Function));
        assert!(caps.supports(BackendKind::Http));
    }

    #[test]
    fn test_compiled_capabilities_match_features() {
        let caps = Capabilities::probe();
        assert_eq!(caps.sql, cfg!(feature = "postgres"));
        assert_eq!(caps.http, cfg!(feature = "http"));
    }
}
