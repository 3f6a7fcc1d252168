//! Performance checklist run by `storefront-cache check`.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::StoreDriver;
use crate::config::Settings;
use crate::instrumentation::{Grade, MemorySink};

use super::services::CacheServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub items: Vec<CheckItem>,
}

impl CheckReport {
    fn pass(&mut self, name: &'static str, detail: impl Into<String>) {
        self.push(name, CheckStatus::Pass, detail);
    }

    fn warn(&mut self, name: &'static str, detail: impl Into<String>) {
        self.push(name, CheckStatus::Warn, detail);
    }

    fn fail(&mut self, name: &'static str, detail: impl Into<String>) {
        self.push(name, CheckStatus::Fail, detail);
    }

    fn push(&mut self, name: &'static str, status: CheckStatus, detail: impl Into<String>) {
        self.items.push(CheckItem {
            name,
            status,
            detail: detail.into(),
        });
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(CheckStatus::Fail) > 0
    }

    pub fn item(&self, name: &str) -> Option<&CheckItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for item in &self.items {
            let _ = writeln!(out, "[{}] {}: {}", item.status.as_str(), item.name, item.detail);
        }
        let _ = write!(
            out,
            "{} passed, {} warnings, {} failed",
            self.count(CheckStatus::Pass),
            self.count(CheckStatus::Warn),
            self.count(CheckStatus::Fail)
        );
        f.write_str(&out)
    }
}

/// Run every check against `settings`. Never fails itself; problems become report items.
pub async fn run_checks(settings: &Settings) -> CheckReport {
    let mut report = CheckReport::default();

    check_configuration(settings, &mut report);
    check_driver(settings, &mut report);
    check_timeout_bound(settings, &mut report);
    check_lifetime_ordering(settings, &mut report);
    check_eager_relations(settings, &mut report);
    check_content_root(settings, &mut report);
    check_store(settings, &mut report).await;

    debug!(
        target = "storefront::check",
        items = report.items.len(),
        failed = report.count(CheckStatus::Fail),
        "checklist finished"
    );
    report
}

fn check_configuration(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "response cache";
    if settings.cache.enabled {
        report.pass(
            NAME,
            format!(
                "enabled, namespace `{}`, tag `{}`",
                settings.cache.namespace, settings.cache.tag
            ),
        );
    } else {
        report.warn(NAME, "disabled; every request is rendered");
    }
}

fn check_driver(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "backing store driver";
    match settings.cache.driver {
        StoreDriver::Memory => report.warn(
            NAME,
            "memory; entries are not shared between processes and vanish on restart",
        ),
        StoreDriver::File => report.pass(
            NAME,
            format!("file at {}", settings.cache.file_directory.display()),
        ),
        StoreDriver::Redis => report.pass(NAME, "redis"),
    }
}

fn check_timeout_bound(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "store timeout";
    let timeout = Duration::from_millis(settings.cache.store_timeout_ms.get());
    let slow = settings.monitoring.slow_threshold;
    if timeout >= slow {
        report.warn(
            NAME,
            format!(
                "{}ms is not below the {}ms slow threshold; a hung store makes every request slow",
                timeout.as_millis(),
                slow.as_millis()
            ),
        );
    } else {
        report.pass(NAME, format!("{}ms", timeout.as_millis()));
    }
}

fn check_lifetime_ordering(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "lifetime ordering";
    let http = &settings.http_caching;
    if http.static_max_age < http.catalog.max_age || http.catalog.max_age < http.default.max_age {
        report.warn(
            NAME,
            format!(
                "expected static ({}s) >= catalog ({}s) >= default ({}s)",
                http.static_max_age.as_secs(),
                http.catalog.max_age.as_secs(),
                http.default.max_age.as_secs()
            ),
        );
    } else {
        report.pass(
            NAME,
            format!(
                "static {}s, catalog {}s, default {}s",
                http.static_max_age.as_secs(),
                http.catalog.max_age.as_secs(),
                http.default.max_age.as_secs()
            ),
        );
    }
}

fn check_eager_relations(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "eager relations";
    let relations = &settings.eager_loading.default_relations;
    let empty: Vec<&str> = relations
        .iter()
        .filter(|(_, list)| list.is_empty())
        .map(|(model, _)| model.as_str())
        .collect();

    if relations.is_empty() {
        report.warn(NAME, "no defaults configured; catalogue loads fetch relations lazily");
    } else if !empty.is_empty() {
        report.warn(NAME, format!("empty lists for {}", empty.join(", ")));
    } else {
        let models: Vec<&str> = relations.keys().map(String::as_str).collect();
        report.pass(NAME, format!("configured for {}", models.join(", ")));
    }
}

fn check_content_root(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "content root";
    let root = &settings.content.root;
    if root.is_dir() {
        report.pass(NAME, root.display().to_string());
    } else {
        report.warn(NAME, format!("{} is not a directory", root.display()));
    }
}

async fn check_store(settings: &Settings, report: &mut CheckReport) {
    const NAME: &str = "store reachability";
    let services = match CacheServices::from_settings(settings, Arc::new(MemorySink::new())) {
        Ok(services) => services,
        Err(err) => {
            report.fail(NAME, format!("could not open backing store: {err}"));
            return;
        }
    };

    let probe = services
        .instrumentation
        .measure_async("store.probe", services.store.probe())
        .await;
    match probe {
        Ok(latency) => {
            let grade = Grade::classify(latency, &settings.monitoring.grades);
            report.pass(
                NAME,
                format!(
                    "{} answered in {}ms ({})",
                    services.store.backend_name(),
                    latency.as_millis(),
                    grade.as_str()
                ),
            );
        }
        Err(err) => report.fail(
            NAME,
            format!("{} probe failed: {err}", services.store.backend_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_items_and_totals() {
        let mut report = CheckReport::default();
        report.pass("a", "fine");
        report.warn("b", "hmm");
        report.fail("c", "broken");

        let text = report.to_string();
        assert!(text.contains("[PASS] a: fine"));
        assert!(text.contains("[WARN] b: hmm"));
        assert!(text.contains("[FAIL] c: broken"));
        assert!(text.ends_with("1 passed, 1 warnings, 1 failed"));
        assert!(report.has_failures());
    }

    #[test]
    fn report_serializes_lowercase_statuses() {
        let mut report = CheckReport::default();
        report.warn("driver", "memory");
        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["items"][0]["status"], "warn");
        assert_eq!(json["items"][0]["name"], "driver");
    }

    #[tokio::test]
    async fn default_settings_pass_with_memory_warning() {
        let settings = Settings::from_defaults().expect("valid defaults");
        let report = run_checks(&settings).await;

        assert!(!report.has_failures(), "{report}");
        assert_eq!(
            report.item("store reachability").map(|item| item.status),
            Some(CheckStatus::Pass)
        );
        assert_eq!(
            report.item("backing store driver").map(|item| item.status),
            Some(CheckStatus::Warn)
        );
        assert_eq!(
            report.item("lifetime ordering").map(|item| item.status),
            Some(CheckStatus::Pass)
        );
    }

    #[tokio::test]
    async fn file_store_is_probed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = Settings::from_defaults().expect("valid defaults");
        settings.cache.driver = StoreDriver::File;
        settings.cache.file_directory = dir.path().join("cache");

        let report = run_checks(&settings).await;
        let store = report.item("store reachability").expect("store item");
        assert_eq!(store.status, CheckStatus::Pass, "{}", store.detail);
        assert!(store.detail.starts_with("file"));
    }

    #[test]
    fn slow_timeouts_are_flagged() {
        let mut settings = Settings::from_defaults().expect("valid defaults");
        settings.cache.store_timeout_ms = std::num::NonZeroU64::new(5_000).expect("non-zero");

        let mut report = CheckReport::default();
        check_timeout_bound(&settings, &mut report);
        assert_eq!(report.items[0].status, CheckStatus::Warn);
    }
}
