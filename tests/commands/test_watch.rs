//! Tests for the patient watcher against a mock patient portal

use httpmock::prelude::*;
use patient_notifier::commands::watch::{load_config, sha256_hex, CheckOutcome, Watcher};
use tempfile::tempdir;

const CHART: &str = r#"<html><body>
    <span class="server-time">08:00:00</span>
    <form id="form1"><td>Creatinine</td><td>1.1</td></form>
</body></html>"#;

#[tokio::test]
async fn test_watcher_from_config_file() {
    let server = MockServer::start_async().await;
    let temp = tempdir().unwrap();

    std::fs::write(temp.path().join("patients.yml"), "patient_ids: [101, 102]\n").unwrap();
    let archive = temp.path().join("archive");
    let config_path = temp.path().join("config.yml");
    std::fs::write(
        &config_path,
        format!(
            "base_url: \"{}\"\npatient_list_file: patients.yml\narchive_dir: \"{}\"\n\
             whatsapp:\n  enabled: false\n  client_id: ward-3\n",
            server.url("/chart?patient={id}"),
            archive.display()
        ),
    )
    .unwrap();

    let first = server.mock(|when, then| {
        when.method(GET).path("/chart").query_param("patient", "101");
        then.status(200).body(CHART);
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/chart").query_param("patient", "102");
        then.status(404);
    });

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.patient_ids, vec!["101", "102"]);
    let watcher = Watcher::new(config).unwrap();

    let outcome = watcher.check_and_notify("101").await;
    assert!(matches!(outcome, Some(CheckOutcome::Baseline { .. })));
    assert_eq!(
        std::fs::read_to_string(archive.join("101").join("last_hash.txt")).unwrap(),
        sha256_hex("Creatinine1.1")
    );

    // A failing patient is logged and skipped
    assert!(watcher.check_and_notify("102").await.is_none());
    assert!(!archive.join("102").exists());

    assert_eq!(
        watcher.check_and_notify("101").await,
        Some(CheckOutcome::Unchanged)
    );

    first.assert_calls(2);
    second.assert_calls(1);
}
