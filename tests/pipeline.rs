mod common;

use flarelaunch::api::{AccessApp, AccessPolicy, DnsRecord};
use flarelaunch::error::LaunchError;
use flarelaunch::pipeline::{ResourceKind, Step};
use flarelaunch::provision::{Outcome, StepState};
use flarelaunch::{LaunchConfig, Pipeline};

use common::{demo_config, project_dir, world};

fn count(events: &[String], event: &str) -> usize {
    events.iter().filter(|e| *e == event).count()
}

fn position(events: &[String], event: &str) -> usize {
    events.iter().position(|e| e == event).unwrap()
}

#[test]
fn demo_project_from_scratch() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.created(), 3);
    assert_eq!(report.reused(), 0);
    let kinds: Vec<ResourceKind> = report.resources.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![ResourceKind::Database, ResourceKind::Bucket, ResourceKind::Project]
    );

    let executed = tool.state.borrow().executed.clone();
    assert_eq!(
        executed,
        vec![dir.path().join("schema.sql"), dir.path().join("seed.sql")]
    );
    assert_eq!(tool.state.borrow().deployments, 1);

    for step in [Step::Domain, Step::Dns, Step::AccessApp, Step::AccessPolicy] {
        assert_eq!(report.step(step).unwrap().state, StepState::Skipped, "{step}");
    }
    assert_eq!(report.step(Step::Revoke).unwrap().state, StepState::Done);

    let state = api.state.borrow();
    assert_eq!(state.revoked.len(), 1);
    assert!(state.active_tokens.is_empty());
    assert_eq!(report.account_id, "acc-1");
    assert_eq!(report.url, "https://demo.pages.dev");
    assert_eq!(
        report.deployment_url.as_deref(),
        Some("https://abc123.demo.pages.dev")
    );
}

#[test]
fn manifest_receives_identifiers() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();

    Pipeline::new(&config, &api, &tool).run().unwrap();

    let manifest = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
    assert!(manifest.contains(r#"database_id = "db-uuid-1""#));
    assert!(manifest.contains(r#"bucket_name = "demo-uploads""#));
    assert!(manifest.contains(r#"preview_bucket_name = "demo-uploads""#));
    assert!(manifest.contains(r#"name = "demo""#));
}

#[test]
fn second_run_reuses_everything() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();

    Pipeline::new(&config, &api, &tool).run().unwrap();
    let manifest_after_first =
        std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.created(), 0);
    assert_eq!(report.reused(), 3);
    assert!(report.resources.iter().all(|r| r.outcome == Outcome::Reused));

    assert_eq!(tool.state.borrow().databases.len(), 1);
    assert_eq!(tool.state.borrow().projects.len(), 1);
    assert_eq!(api.state.borrow().buckets.len(), 1);
    assert_eq!(tool.state.borrow().deployments, 2);
    assert_eq!(api.state.borrow().revoked.len(), 2);

    let manifest_after_second =
        std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
    assert_eq!(manifest_after_first, manifest_after_second);
}

#[test]
fn credential_is_revoked_once_and_last() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("example.com");
    let (api, tool, events) = world();

    Pipeline::new(&config, &api, &tool).run().unwrap();

    let events = events.borrow();
    assert_eq!(count(&events, "api:create_token"), 1);
    assert_eq!(count(&events, "api:delete_token"), 1);
    assert!(position(&events, "api:create_token") < position(&events, "tool:list_databases"));
    assert_eq!(events.last().map(String::as_str), Some("api:delete_token"));
}

#[test]
fn steps_run_with_the_scoped_token() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();

    Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(
        api.operator_calls(),
        vec![
            "accounts_page",
            "user_id",
            "permission_groups",
            "create_token",
            "delete_token"
        ]
    );
    assert_eq!(api.scoped_calls(), vec!["list_buckets", "create_bucket"]);

    let envs = tool.state.borrow().envs.clone();
    assert!(!envs.is_empty());
    assert!(
        envs.iter()
            .all(|(token, account)| token == "secret-token-1" && account == "acc-1")
    );
}

#[test]
fn minted_token_covers_enabled_features_only() {
    let dir = project_dir();
    let config = LaunchConfig::new("demo")
        .source_dir(dir.path().join("dist"))
        .manifest(dir.path().join("wrangler.toml"));
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    let state = api.state.borrow();
    let request = &state.minted[0];
    let names: Vec<&str> = request
        .policies
        .iter()
        .flat_map(|p| p.permission_groups.iter().map(|g| g.name.as_str()))
        .collect();
    assert!(names.contains(&"Pages Write"));
    assert!(!names.contains(&"D1 Write"));
    assert!(!names.contains(&"Workers R2 Storage Write"));
    assert!(request.expires_on.is_some());
    assert!(report.dropped_capabilities.is_empty());
    assert_eq!(report.created(), 1);
}

#[test]
fn domain_attach_failure_does_not_stop_the_run() {
    let dir = project_dir();
    let config = demo_config(dir.path())
        .domain("example.com")
        .access(&["owner@example.com"]);
    let (api, tool, _) = world();
    api.fail("add_pages_domain");

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.step(Step::Domain).unwrap().state, StepState::Failed);
    assert!(report.notices.iter().any(|n| n.contains("www.example.com")));
    let dns = report.resource(ResourceKind::DnsRecord).unwrap();
    assert_eq!(dns.name, "www.example.com");
    assert_eq!(dns.outcome, Outcome::Created);
    for step in [Step::Dns, Step::AccessApp, Step::AccessPolicy] {
        assert_eq!(report.step(step).unwrap().state, StepState::Done, "{step}");
    }
    assert_eq!(
        report.resource(ResourceKind::AccessPolicy).unwrap().outcome,
        Outcome::Created
    );
    assert_eq!(report.url, "https://example.com");
    assert_eq!(api.state.borrow().revoked.len(), 1);
}

#[test]
fn domains_and_www_record_are_provisioned() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("example.com");
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    let domains: Vec<&str> = report
        .resources
        .iter()
        .filter(|r| r.kind == ResourceKind::Domain)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(domains, vec!["example.com", "www.example.com"]);

    let state = api.state.borrow();
    assert_eq!(state.dns.len(), 1);
    let (zone, record) = &state.dns[0];
    assert_eq!(zone, "zone-1");
    assert_eq!(record.record_type, "CNAME");
    assert_eq!(record.content, "demo.pages.dev");
    assert_eq!(record.ttl, 3600);
    assert!(record.proxied);
    assert!(report.notices.iter().any(|n| n.contains("apex")));
}

#[test]
fn existing_www_record_is_updated_in_place() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("example.com");
    let (api, tool, _) = world();
    api.state.borrow_mut().dns.push((
        "zone-1".into(),
        DnsRecord {
            id: "rec-old".into(),
            record_type: "CNAME".into(),
            name: "www.example.com".into(),
            content: "old.pages.dev".into(),
            ttl: 1,
            proxied: false,
        },
    ));

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    let state = api.state.borrow();
    assert_eq!(state.dns.len(), 1);
    assert_eq!(state.dns[0].1.id, "rec-old");
    assert_eq!(state.dns[0].1.content, "demo.pages.dev");
    assert_eq!(
        report.resource(ResourceKind::DnsRecord).unwrap().outcome,
        Outcome::Reused
    );
}

#[test]
fn unknown_zone_is_fatal() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("shop.other.org");
    let (api, tool, _) = world();

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    match err {
        LaunchError::StepFailed {
            step,
            provisioned,
            source,
        } => {
            assert_eq!(step, Step::Dns);
            assert!(matches!(*source, LaunchError::ZoneNotFound(_)));
            assert!(provisioned.iter().any(|r| r.kind == ResourceKind::Project));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.state.borrow().revoked.len(), 1);
}

#[test]
fn deploy_failure_aborts_and_still_revokes() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("example.com");
    let (api, tool, events) = world();
    tool.fail("deploy");

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    let LaunchError::StepFailed {
        step, provisioned, ..
    } = err
    else {
        panic!("expected a step failure");
    };
    assert_eq!(step, Step::Deploy);
    assert_eq!(provisioned.len(), 3);

    let events = events.borrow();
    assert_eq!(count(&events, "api:delete_token"), 1);
    assert_eq!(events.last().map(String::as_str), Some("api:delete_token"));
    assert_eq!(count(&events, "api:add_pages_domain"), 0);
    assert_eq!(count(&events, "api:list_dns_records"), 0);
}

#[test]
fn failed_mint_leaves_nothing_to_revoke() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, events) = world();
    api.fail("create_token");

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    assert!(matches!(
        err,
        LaunchError::StepFailed {
            step: Step::Credential,
            ..
        }
    ));
    let events = events.borrow();
    assert_eq!(count(&events, "api:delete_token"), 0);
    assert!(events.iter().all(|e| !e.starts_with("tool:")));
}

#[test]
fn storage_disabled_is_a_notice() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();
    api.state.borrow_mut().storage_enabled = false;

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.step(Step::Bucket).unwrap().state, StepState::Skipped);
    assert!(report.notices.iter().any(|n| n.contains("R2")));
    assert_eq!(report.created(), 2);
    assert!(report.resource(ResourceKind::Bucket).is_none());
}

#[test]
fn schema_import_failure_is_a_notice() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();
    tool.fail("execute_file");

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(
        report.step(Step::SchemaImport).unwrap().state,
        StepState::Failed
    );
    assert_eq!(report.notices.len(), 2);
    assert_eq!(report.created(), 3);
}

#[test]
fn missing_schema_file_is_skipped() {
    let dir = project_dir();
    std::fs::remove_file(dir.path().join("seed.sql")).unwrap();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(
        tool.state.borrow().executed,
        vec![dir.path().join("schema.sql")]
    );
    assert_eq!(report.step(Step::SchemaImport).unwrap().state, StepState::Done);
}

#[test]
fn existing_project_counts_as_reused() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, _) = world();
    tool.state.borrow_mut().projects.push("demo".into());
    tool.fail("list_projects");

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(
        report.resource(ResourceKind::Project).unwrap().outcome,
        Outcome::Reused
    );
    assert_eq!(tool.state.borrow().projects.len(), 1);
}

#[test]
fn access_policy_is_replaced_not_merged() {
    let dir = project_dir();
    let (api, tool, _) = world();

    let first = demo_config(dir.path())
        .domain("example.com")
        .access(&["alice@example.com", "bob@example.com"]);
    let report = Pipeline::new(&first, &api, &tool).run().unwrap();
    assert_eq!(
        report.resource(ResourceKind::AccessApp).unwrap().name,
        "example.com/admin"
    );
    assert_eq!(
        report.resource(ResourceKind::AccessPolicy).unwrap().outcome,
        Outcome::Created
    );

    let second = demo_config(dir.path())
        .domain("example.com")
        .access(&["carol@example.com"]);
    let report = Pipeline::new(&second, &api, &tool).run().unwrap();
    assert_eq!(
        report.resource(ResourceKind::AccessApp).unwrap().outcome,
        Outcome::Reused
    );
    assert_eq!(
        report.step(Step::AccessPolicy).unwrap().detail.as_deref(),
        Some("updated")
    );

    let state = api.state.borrow();
    assert_eq!(state.apps.len(), 1);
    assert_eq!(state.policies.len(), 1);
    assert_eq!(state.apps[0].name, "Admin Access");
    assert_eq!(state.policies[0].1.name, "Admin Policy");
    assert_eq!(state.policies[0].1.emails(), vec!["carol@example.com"]);
}

#[test]
fn existing_admin_policy_is_adopted() {
    let dir = project_dir();
    let config = demo_config(dir.path())
        .domain("example.com")
        .access(&["owner@example.com"]);
    let (api, tool, _) = world();
    {
        let mut state = api.state.borrow_mut();
        state.apps.push(AccessApp {
            id: "app-old".into(),
            name: "Admin Access".into(),
            domain: "example.com/admin".into(),
        });
        state.policies.push((
            "app-old".into(),
            AccessPolicy {
                id: "pol-old".into(),
                name: "Admin Policy".into(),
                decision: "allow".into(),
                include: vec![serde_json::json!({ "email": { "email": "former@example.com" } })],
            },
        ));
    }

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(
        report.resource(ResourceKind::AccessApp).unwrap().outcome,
        Outcome::Reused
    );
    assert_eq!(
        report.step(Step::AccessPolicy).unwrap().detail.as_deref(),
        Some("updated")
    );
    let state = api.state.borrow();
    assert_eq!(state.policies.len(), 1);
    assert_eq!(state.policies[0].1.id, "pol-old");
    assert_eq!(state.policies[0].1.emails(), vec!["owner@example.com"]);
}

#[test]
fn access_app_failure_skips_policy() {
    let dir = project_dir();
    let config = demo_config(dir.path())
        .domain("example.com")
        .access(&["alice@example.com"]);
    let (api, tool, _) = world();
    api.fail("create_access_app");

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.step(Step::AccessApp).unwrap().state, StepState::Failed);
    assert_eq!(
        report.step(Step::AccessPolicy).unwrap().state,
        StepState::Skipped
    );
    assert_eq!(api.state.borrow().revoked.len(), 1);
}

#[test]
fn missing_wrangler_fails_before_any_remote_call() {
    let dir = project_dir();
    let config = demo_config(dir.path());
    let (api, tool, events) = world();
    tool.state.borrow_mut().missing = true;

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    assert!(matches!(err, LaunchError::CommandNotFound(_)));
    assert!(events.borrow().is_empty());
}

#[test]
fn missing_index_html_fails_before_any_remote_call() {
    let dir = project_dir();
    std::fs::remove_file(dir.path().join("dist").join("index.html")).unwrap();
    let config = demo_config(dir.path());
    let (api, tool, events) = world();

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    match err {
        LaunchError::StepFailed {
            step,
            provisioned,
            source,
        } => {
            assert_eq!(step, Step::Prepare);
            assert!(provisioned.is_empty());
            assert!(source.to_string().contains("index.html"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(events.borrow().is_empty());
    assert!(api.state.borrow().minted.is_empty());
}

#[test]
fn source_is_copied_to_output_dir_and_deployed() {
    let dir = project_dir();
    std::fs::create_dir_all(dir.path().join("dist").join("assets")).unwrap();
    std::fs::write(dir.path().join("dist").join("assets").join("app.js"), "1").unwrap();
    let output = dir.path().join("public");
    std::fs::create_dir_all(&output).unwrap();
    std::fs::write(output.join("stale.html"), "old").unwrap();
    let config = demo_config(dir.path()).output_dir(&output);
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    assert_eq!(report.step(Step::Prepare).unwrap().state, StepState::Done);
    assert!(output.join("index.html").is_file());
    assert!(output.join("assets").join("app.js").is_file());
    assert!(!output.join("stale.html").exists());
    assert_eq!(tool.state.borrow().deployed_dirs, vec![output.clone()]);

    let manifest = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
    let table: toml::Table = toml::from_str(&manifest).unwrap();
    assert_eq!(
        table["pages_build_output_dir"].as_str(),
        Some(output.to_string_lossy().as_ref())
    );
    assert_eq!(api.state.borrow().revoked.len(), 1);
}

#[test]
fn dns_toggle_skips_domains_and_records() {
    let dir = project_dir();
    let config = demo_config(dir.path()).domain("example.com").dns(false);
    let (api, tool, _) = world();

    let report = Pipeline::new(&config, &api, &tool).run().unwrap();

    for step in [Step::Domain, Step::Dns] {
        assert_eq!(report.step(step).unwrap().state, StepState::Skipped, "{step}");
    }
    assert!(report.resource(ResourceKind::Domain).is_none());
    let state = api.state.borrow();
    assert!(state.pages_domains.is_empty());
    assert!(state.dns.is_empty());
    drop(state);
    assert_eq!(report.url, "https://example.com");
}

#[test]
fn invalid_config_fails_before_any_remote_call() {
    let dir = project_dir();
    let config = demo_config(dir.path()).access(&["not-an-email"]);
    let (api, tool, events) = world();

    let err = Pipeline::new(&config, &api, &tool).run().unwrap_err();

    assert!(matches!(err, LaunchError::Config(_)));
    assert!(events.borrow().is_empty());
}

#[test]
fn configured_account_skips_discovery() {
    let dir = project_dir();
    let config = demo_config(dir.path()).account_id("acc-1");
    let (api, tool, _) = world();

    Pipeline::new(&config, &api, &tool).run().unwrap();

    assert!(!api.operator_calls().contains(&"accounts_page".to_string()));
}
