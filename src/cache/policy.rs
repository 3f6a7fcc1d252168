//! Cacheability decisions.
//!
//! [`PolicyEngine::decide`] is a pure function of the request descriptor and the
//! configured lifetimes. Rules are checked in order and the first match wins.

use std::fmt;
use std::time::Duration;

use axum::http::Method;

/// Extensions served with a one-year immutable lifetime. Compared case-sensitively.
pub const STATIC_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".jpg", ".jpeg", ".png", ".gif",
    ".svg", ".webp",
];

const CATALOG_ROUTE_MARKERS: &[&str] = &["product", "category"];
const HOME_ROUTE_MARKER: &str = "home";
const VARY_ACCEPT_ENCODING: &str = "Accept-Encoding";

/// What the cache layer knows about an incoming request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub route_name: String,
    pub path: String,
    /// Raw query string; only feeds response-key derivation.
    pub query: Option<String>,
    pub is_authenticated: bool,
    /// Strong entity tags from `If-None-Match`, without quotes.
    pub incoming_validators: Vec<String>,
}

/// One `Cache-Control` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Public,
    Private,
    NoStore,
    NoCache,
    MaxAge(Duration),
    StaleWhileRevalidate(Duration),
    Immutable,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Public => f.write_str("public"),
            Directive::Private => f.write_str("private"),
            Directive::NoStore => f.write_str("no-store"),
            Directive::NoCache => f.write_str("no-cache"),
            Directive::MaxAge(age) => write!(f, "max-age={}", age.as_secs()),
            Directive::StaleWhileRevalidate(age) => {
                write!(f, "stale-while-revalidate={}", age.as_secs())
            }
            Directive::Immutable => f.write_str("immutable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    NoStore,
    /// Compute validators but make clients revalidate every time.
    ValidatorsOnly,
    Cacheable { max_age: Duration },
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Authenticated,
    UnsafeMethod,
    StaticAsset,
    Catalog,
    Home,
    Default,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Authenticated => "authenticated",
            RouteClass::UnsafeMethod => "unsafe_method",
            RouteClass::StaticAsset => "static_asset",
            RouteClass::Catalog => "catalog",
            RouteClass::Home => "home",
            RouteClass::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicyDecision {
    pub verdict: Verdict,
    pub class: RouteClass,
    /// Empty whenever the verdict is [`Verdict::NoStore`].
    pub directives: Vec<Directive>,
    pub vary_on: Vec<&'static str>,
}

impl CachePolicyDecision {
    fn no_store(class: RouteClass) -> Self {
        Self {
            verdict: Verdict::NoStore,
            class,
            directives: Vec::new(),
            vary_on: Vec::new(),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self.verdict, Verdict::NoStore)
    }

    /// How long a rendered body may be kept server-side.
    pub fn store_lifetime(&self) -> Option<Duration> {
        match self.verdict {
            Verdict::Cacheable { max_age } => Some(max_age),
            _ => None,
        }
    }

    /// `Cache-Control` header value, `None` for non-cacheable decisions.
    pub fn cache_control(&self) -> Option<String> {
        if self.directives.is_empty() {
            return None;
        }
        Some(
            self.directives
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// Browser lifetime pair for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub max_age: Duration,
    pub stale_while_revalidate: Duration,
}

impl Lifetime {
    pub const fn from_secs(max_age: u64, stale_while_revalidate: u64) -> Self {
        Self {
            max_age: Duration::from_secs(max_age),
            stale_while_revalidate: Duration::from_secs(stale_while_revalidate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub static_max_age: Duration,
    pub catalog: Lifetime,
    pub default: Lifetime,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            static_max_age: Duration::from_secs(31_536_000),
            catalog: Lifetime::from_secs(86_400, 604_800),
            default: Lifetime::from_secs(3_600, 86_400),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn decide(&self, request: &RequestDescriptor) -> CachePolicyDecision {
        if request.is_authenticated {
            return CachePolicyDecision::no_store(RouteClass::Authenticated);
        }
        if request.method != Method::GET {
            return CachePolicyDecision::no_store(RouteClass::UnsafeMethod);
        }

        if is_static_asset(&request.path) {
            let max_age = self.config.static_max_age;
            if max_age.is_zero() {
                return validators_only(RouteClass::StaticAsset);
            }
            return CachePolicyDecision {
                verdict: Verdict::Cacheable { max_age },
                class: RouteClass::StaticAsset,
                directives: vec![
                    Directive::Public,
                    Directive::MaxAge(max_age),
                    Directive::Immutable,
                ],
                vary_on: vec![VARY_ACCEPT_ENCODING],
            };
        }

        if CATALOG_ROUTE_MARKERS
            .iter()
            .any(|marker| request.route_name.contains(marker))
        {
            return revalidating(RouteClass::Catalog, self.config.catalog);
        }

        let class = if request.route_name.contains(HOME_ROUTE_MARKER) {
            RouteClass::Home
        } else {
            RouteClass::Default
        };
        revalidating(class, self.config.default)
    }
}

fn is_static_asset(path: &str) -> bool {
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn revalidating(class: RouteClass, lifetime: Lifetime) -> CachePolicyDecision {
    if lifetime.max_age.is_zero() {
        return validators_only(class);
    }
    CachePolicyDecision {
        verdict: Verdict::Cacheable {
            max_age: lifetime.max_age,
        },
        class,
        directives: vec![
            Directive::Public,
            Directive::MaxAge(lifetime.max_age),
            Directive::StaleWhileRevalidate(lifetime.stale_while_revalidate),
        ],
        vary_on: vec![VARY_ACCEPT_ENCODING],
    }
}

fn validators_only(class: RouteClass) -> CachePolicyDecision {
    CachePolicyDecision {
        verdict: Verdict::ValidatorsOnly,
        class,
        directives: vec![Directive::NoCache],
        vary_on: vec![VARY_ACCEPT_ENCODING],
    }
}
