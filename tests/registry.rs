// tests/registry.rs
mod common;

use common::{scripted_factory, scripted_source, SCRIPTED};
use portal_sync::scrape::registry::global;
use portal_sync::scrape::ScrapeDefaults;
use portal_sync::{ScraperRegistry, SourceConfig};
use serde_json::json;

#[test]
fn custom_adapter_registers_next_to_builtins() {
    let mut r = ScraperRegistry::with_builtin(ScrapeDefaults::default());
    assert!(r.lookup(SCRIPTED).is_none());
    r.register(" Scripted ", scripted_factory);

    let kinds = r.available_types();
    assert_eq!(kinds.len(), 7);
    assert!(kinds.contains(SCRIPTED));

    let s = r.create(&scripted_source(9, "o", json!([]))).expect("scripted adapter");
    assert_eq!(s.kind(), SCRIPTED);
    assert_eq!(s.config().id, 9);
    assert!(r.validate_config(SCRIPTED, &scripted_source(9, "o", json!([]))));
}

#[test]
fn empty_registry_knows_nothing() {
    let r = ScraperRegistry::new(ScrapeDefaults::default());
    assert!(r.available_types().is_empty());
    let cfg = SourceConfig::new(1, "o", "github", "https://github.com/a/b");
    assert!(r.create(&cfg).is_none());
    assert!(!r.validate_config("github", &cfg));
}

#[test]
fn global_builds_every_builtin_adapter() {
    let cases = [
        ("github", "https://github.com/acme/app", json!({"token": "t"})),
        ("jira", "https://acme.atlassian.net", json!({"username": "u", "api_token": "t"})),
        ("trello", "https://trello.com", json!({"api_key": "k", "api_token": "t"})),
        ("canvas", "https://school.instructure.com", json!({"access_token": "t"})),
        ("moodle", "https://moodle.school.edu", json!({"webservice_token": "t"})),
        ("blackboard", "https://blackboard.school.edu", json!({"api_key": "t"})),
    ];
    for (i, (kind, url, creds)) in cases.into_iter().enumerate() {
        let cfg = SourceConfig::new(i as i64, "o", kind, url)
            .with_credentials(portal_sync::model::Settings::from_value(creds));
        let s = global().create(&cfg).unwrap_or_else(|| panic!("{kind} adapter"));
        assert_eq!(s.kind(), kind);
        assert!(s.validate_credentials(), "{kind} credentials");
    }
}
