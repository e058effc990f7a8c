mod middleware;

pub use middleware::PathNormalizer;

/// The feed document which directory-style paths are redirected to.
pub const FEED_FILE: &str = "feed.xml";

/// The outcome of inspecting a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Permanently (301) redirect the client to the given path.
    RedirectPermanent(String),
    /// Let the request through to the next handler unmodified.
    Continue,
}

impl Decision {
    /// Builds the redirect target for this decision, re-attaching the
    /// original query string when there is one.
    pub fn location(&self, query: &str) -> Option<String> {
        match self {
            Decision::RedirectPermanent(path) if query.is_empty() => Some(path.clone()),
            Decision::RedirectPermanent(path) => Some(format!("{path}?{query}")),
            Decision::Continue => None,
        }
    }
}

/// Decides how a request for `path` should be handled.
///
/// The rules are evaluated in order and the first match wins:
///
/// 1. Paths containing uppercase characters are redirected to their
///    lowercase form (and nothing else, even if rule 2 would also apply).
/// 2. Paths without a `.` anywhere in them, other than `/`, are treated
///    as directories and redirected to the `feed.xml` within them.
/// 3. Everything else continues unmodified.
///
/// The `.` check in rule 2 is a plain substring test, so `/v1.2/info`
/// continues even though its final segment has no extension.
pub fn decide(path: &str) -> Decision {
    let lower = path.to_lowercase();
    if lower != path {
        return Decision::RedirectPermanent(lower);
    }

    if !lower.contains('.') && lower != "/" {
        let dir = lower.strip_suffix('/').unwrap_or(&lower);
        return Decision::RedirectPermanent(format!("{dir}/{FEED_FILE}"));
    }

    Decision::Continue
}
