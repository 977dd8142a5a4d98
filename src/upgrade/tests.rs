use super::*;
use crate::config::{BackupSettings, DirSpec, PayloadSettings, UpgradeSettings};
use crate::host::{Collaborators, FileTransfer, View};
use crate::merge::ConfigMerger;
use crate::test_utils::{
    FailingFiles, FakeInstaller, FakeSource, RecordingHost, SESSION, ScriptedOperator, Tree,
    init_test_logging,
};
use crate::utils::fs::LocalFileTransfer;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const CHECK_URL: &str = "https://example.com/org/bot-releases.git";
const FILES_URL: &str = "https://example.com/org/bot.git";
const TIMEOUT: Duration = Duration::from_millis(200);

/// Files the backup step covers in these tests.
const BACKED_UP: &[&str] = &[
    "bot.py",
    "config.toml",
    "requirements.txt",
    "cogs/bridge.py",
    "plugins/system.json",
    "plugins/bridge.json",
];

type Env<F = LocalFileTransfer> =
    Collaborators<FakeSource, FakeInstaller, F, RecordingHost, ScriptedOperator>;

fn settings() -> UpgradeSettings {
    UpgradeSettings {
        check_endpoint: CHECK_URL.to_string(),
        files_endpoint: "https://example.com/org".to_string(),
        files_repository: "bot".to_string(),
        backup: BackupSettings {
            files: vec!["bot.py".into(), "config.toml".into(), "requirements.txt".into()],
            dirs: vec![DirSpec::new("cogs"), DirSpec::new("plugins")],
        },
        payload: PayloadSettings {
            files: vec!["bot.py".into(), "requirements.txt".into()],
            dirs: vec![DirSpec::new("cogs"), DirSpec::new("languages").with_extension("json")],
        },
        ..UpgradeSettings::default()
    }
}

fn tree(entries: &[(&str, String)]) -> Tree {
    entries
        .iter()
        .map(|(path, content)| (PathBuf::from(path), content.clone().into_bytes()))
        .collect()
}

fn check_tree(release: i64, reboot: i64, legacy: serde_json::Value) -> Tree {
    tree(&[(
        "update.json",
        json!({"version": format!("v{release}"), "release": release, "reboot": reboot, "legacy": legacy})
            .to_string(),
    )])
}

fn release_tree(release: i64) -> Tree {
    tree(&[
        ("plugins/system.json", json!({"id": "system", "version": format!("v{release}"), "release": release}).to_string()),
        ("bot.py", format!("print('v{release}')")),
        ("config.toml", "[bot]\nprefix = \"u!\"\nowner = 0\n".to_string()),
        ("requirements.txt", "aiohttp\ntomli\n".to_string()),
        ("cogs/bridge.py", format!("bridge v{release}")),
        ("cogs/moderation.py", "moderation".to_string()),
        ("languages/en.json", "{}".to_string()),
        ("languages/README.md", "docs".to_string()),
    ])
}

async fn seed(root: &Path) {
    let entries = [
        ("plugins/system.json", json!({"id": "system", "version": "v10", "release": 10, "modules": []}).to_string()),
        (
            "plugins/bridge.json",
            json!({"id": "bridge", "name": "Bridge", "version": "v1", "release": 1,
                   "modules": ["bridge.py"], "shutdown": true})
            .to_string(),
        ),
        ("bot.py", "print('v10')".to_string()),
        ("config.toml", "prefix = \"?\"\nlegacy_key = 1\n".to_string()),
        ("requirements.txt", "aiohttp\n".to_string()),
        ("cogs/bridge.py", "bridge v10".to_string()),
    ];
    for (path, content) in entries {
        LocalFileTransfer.write(&root.join(path), content.as_bytes()).await.unwrap();
    }
}

async fn snapshot(files: &impl FileTransfer, root: &Path) -> Vec<Vec<u8>> {
    let mut contents = Vec::new();
    for path in BACKED_UP {
        contents.push(files.read(&root.join(path)).await.unwrap());
    }
    contents
}

fn env_with<F>(source: FakeSource, packages: FakeInstaller, files: F, operator: ScriptedOperator) -> Env<F> {
    Collaborators {
        source,
        packages,
        files,
        host: RecordingHost::with_extensions(&["cogs.bridge", "cogs.sysmgr"]),
        operator,
    }
}

fn env(source: FakeSource, operator: ScriptedOperator) -> Env {
    env_with(source, FakeInstaller::succeeding(), LocalFileTransfer, operator)
}

fn standard_source() -> FakeSource {
    FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 0, json!([])))
        .serve(FILES_URL, Some("v12"), release_tree(12))
}

async fn run<F: FileTransfer>(root: &Path, env: &Env<F>, flags: UpgradeFlags) -> UpgradeReport {
    init_test_logging(None);
    let settings = settings();
    UpgradeOrchestrator::new(env, root, &settings)
        .with_confirm_timeout(TIMEOUT)
        .run(SESSION, flags)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_upgrade_reloads_extensions() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let env = env(standard_source(), ScriptedOperator::new().accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(
        report.transitions,
        vec![
            UpgradeState::Checking,
            UpgradeState::AwaitingSelection,
            UpgradeState::BackingUp,
            UpgradeState::AwaitingFinalConfirm,
            UpgradeState::Downloading,
            UpgradeState::Installing,
            UpgradeState::ReconcilingConfig,
            UpgradeState::Reloading,
            UpgradeState::Success,
        ]
    );
    assert!(report.error.is_none());
    assert_eq!(report.selected.as_ref().map(|d| d.release), Some(12));

    let files = LocalFileTransfer;
    assert_eq!(files.read_to_string(&root.join("bot.py")).await.unwrap(), "print('v12')");
    assert_eq!(files.read_to_string(&root.join("cogs/moderation.py")).await.unwrap(), "moderation");
    assert!(root.join("languages/en.json").exists());
    assert!(!root.join("languages/README.md").exists());

    let record = crate::manifest::CurrentState::load(&files, &root.join("plugins/system.json")).await.unwrap();
    assert_eq!(record.release, 12);
    assert_eq!(record.version, "v12");

    let config = ConfigMerger::parse(&files.read_to_string(&root.join("config.toml")).await.unwrap()).unwrap();
    assert_eq!(config["bot"]["prefix"].as_str(), Some("?"));
    assert_eq!(config["bot"]["owner"].as_integer(), Some(0));
    assert!(!config.contains_key("legacy_key"));

    // Only the new dependency is installed.
    let calls = env.packages.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec!["tomli".to_string()]);
    assert!(!calls[0].1.no_dependencies);

    assert_eq!(env.host.reloads(), vec!["cogs.bridge".to_string(), "cogs.sysmgr".to_string()]);
    assert_eq!(env.host.shutdown_checks(), vec!["bridge".to_string()]);
    assert!(!env.host.reboot_flagged());
}

#[tokio::test]
async fn test_up_to_date_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let source = FakeSource::new().serve(CHECK_URL, Some("main"), check_tree(10, 0, json!([])));
    let env = env(source, ScriptedOperator::new());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::UpToDate));
    assert!(matches!(report.error, Some(UpgradeError::NoUpdateAvailable)));
    assert_eq!(env.source.fetches().len(), 1);
    assert!(!root.join("old/backup.json").exists());
}

#[tokio::test]
async fn test_force_offers_same_release() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(10, 0, json!([])))
        .serve(FILES_URL, Some("v10"), release_tree(10));
    let env = env(source, ScriptedOperator::new().accept().accept());
    let flags = UpgradeFlags {
        force: true,
        ..UpgradeFlags::default()
    };
    let report = run(root, &env, flags).await;
    assert_eq!(report.state(), Some(UpgradeState::Success));
}

#[tokio::test]
async fn test_selection_timeout_aborts_without_changes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let env = env(standard_source(), ScriptedOperator::new());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Aborted));
    assert!(!report.passed_through(UpgradeState::BackingUp));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
    assert_eq!(env.source.fetches().len(), 1);
    assert!(env.packages.calls().is_empty());
    assert!(env.host.reloads().is_empty());
}

#[tokio::test]
async fn test_final_confirmation_timeout_aborts_before_download() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let env = env(standard_source(), ScriptedOperator::new().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Aborted));
    assert!(report.passed_through(UpgradeState::AwaitingFinalConfirm));
    assert!(!report.passed_through(UpgradeState::Downloading));
    assert_eq!(env.source.fetches().len(), 1);
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
    // Only the recovery directory was written.
    assert!(report.passed_through(UpgradeState::BackingUp));
    assert!(root.join("old/backup.json").exists());
    assert_eq!(LocalFileTransfer.read(&root.join("old/bot.py")).await.unwrap(), b"print('v10')");
}

#[tokio::test]
async fn test_reject_aborts() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let env = env(standard_source(), ScriptedOperator::new().reject());
    let report = run(root, &env, UpgradeFlags::default()).await;
    assert_eq!(report.state(), Some(UpgradeState::Aborted));
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_foreign_interactions_are_ignored() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let operator = ScriptedOperator::new()
        .from_actor(99, SESSION.message_id, "accept")
        .from_actor(SESSION.actor_id, 99, "accept")
        .reject();
    let env = env(standard_source(), operator);
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Aborted));
    assert_eq!(env.operator.remaining(), 0);
}

#[tokio::test]
async fn test_selection_cycles_to_legacy_candidate() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let legacy = json!([{"lower": 5, "upper": 10, "release": 3, "version": "v10-lts3", "reboot": -5}]);
    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 0, legacy))
        .serve(FILES_URL, Some("v10-lts3"), release_tree(10));
    let operator = ScriptedOperator::new().select(1).select(7).select(0).select(1).accept().accept();
    let env = env(source, operator);
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Success));
    let selected = report.selected.unwrap();
    assert!(selected.is_legacy());
    assert_eq!(selected.version, "v10-lts3");

    let shown: Vec<usize> = env
        .operator
        .views()
        .into_iter()
        .filter_map(|view| match view {
            View::Candidates {
                selected,
                candidates,
                ..
            } => {
                assert_eq!(candidates.len(), 2);
                Some(selected)
            }
            _ => None,
        })
        .collect();
    assert_eq!(shown, vec![0, 1, 0, 1]);

    let record = crate::manifest::CurrentState::load(&LocalFileTransfer, &root.join("plugins/system.json"))
        .await
        .unwrap();
    assert_eq!(record.version, "v10-lts3");
    assert_eq!(record.legacy, Some(3));
    assert_eq!(record.release, 10);
    assert_eq!(record.extra.get("modules"), Some(&json!([])));
}

#[tokio::test]
async fn test_selection_disabled_with_single_candidate() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let env = env(standard_source(), ScriptedOperator::new().select(0).accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Success));
    let candidate_views =
        env.operator.views().into_iter().filter(|v| matches!(v, View::Candidates { .. })).count();
    assert_eq!(candidate_views, 1);
}

#[tokio::test]
async fn test_download_failure_needs_no_rollback() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let source = FakeSource::new().serve(CHECK_URL, Some("main"), check_tree(12, 0, json!([])));
    let env = env(source, ScriptedOperator::new().accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::DownloadFailed));
    assert!(!report.passed_through(UpgradeState::RollingBack));
    assert!(matches!(report.error, Some(UpgradeError::DownloadFailed { ref reference, .. }) if reference == "v12"));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
}

#[tokio::test]
async fn test_download_without_version_record_fails() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let mut incomplete = release_tree(12);
    incomplete.remove(Path::new("plugins/system.json"));
    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 0, json!([])))
        .serve(FILES_URL, Some("v12"), incomplete);
    let env = env(source, ScriptedOperator::new().accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::DownloadFailed));
    assert!(env.packages.calls().is_empty());
}

#[tokio::test]
async fn test_dependency_failure_rolls_back() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let env = env_with(
        standard_source(),
        FakeInstaller::failing(1),
        LocalFileTransfer,
        ScriptedOperator::new().accept().accept(),
    );
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::RollbackOk));
    assert!(report.passed_through(UpgradeState::RollingBack));
    assert!(matches!(
        report.error,
        Some(UpgradeError::DependencyInstallFailed { ref packages, .. }) if packages == "tomli"
    ));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
    assert!(env.host.reloads().is_empty());
}

#[tokio::test]
async fn test_install_failure_restores_files_bit_for_bit() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    // The payload and the version record are installed, then the configuration
    // merge fails because the release ships no config.toml.
    let mut broken = release_tree(12);
    broken.remove(Path::new("config.toml"));
    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 0, json!([])))
        .serve(FILES_URL, Some("v12"), broken);
    let env = env(source, ScriptedOperator::new().accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::RollbackOk));
    assert!(report.passed_through(UpgradeState::ReconcilingConfig));
    assert!(matches!(report.error, Some(UpgradeError::InstallFailed { .. })));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
}

#[tokio::test]
async fn test_rollback_with_default_settings_restores_every_payload_file() {
    init_test_logging(None);
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    for (path, content) in [("emojis/base.json", "OLD-EMOJIS"), ("requirements_stable.txt", "OLD-STABLE")] {
        LocalFileTransfer.write(&root.join(path), content.as_bytes()).await.unwrap();
    }

    let mut release = release_tree(12);
    release.remove(Path::new("config.toml"));
    release.insert("emojis/base.json".into(), b"NEW-EMOJIS".to_vec());
    release.insert("requirements_stable.txt".into(), b"NEW-STABLE".to_vec());
    release.insert("cogs/brand_new.py".into(), b"new cog".to_vec());
    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 0, json!([])))
        .serve(FILES_URL, Some("v12"), release);
    let env = env(source, ScriptedOperator::new().accept().accept());

    let settings = UpgradeSettings {
        check_endpoint: CHECK_URL.to_string(),
        files_endpoint: "https://example.com/org".to_string(),
        files_repository: "bot".to_string(),
        ..UpgradeSettings::default()
    };
    let report = UpgradeOrchestrator::new(&env, root, &settings)
        .with_confirm_timeout(TIMEOUT)
        .run(SESSION, UpgradeFlags::default())
        .await
        .unwrap();

    assert_eq!(report.state(), Some(UpgradeState::RollbackOk));
    let read = |path: &str| std::fs::read(root.join(path)).unwrap();
    assert_eq!(read("emojis/base.json"), b"OLD-EMOJIS");
    assert_eq!(read("requirements_stable.txt"), b"OLD-STABLE");
    assert_eq!(read("requirements.txt"), b"aiohttp\n");
    assert_eq!(read("bot.py"), b"print('v10')");
    assert_eq!(read("cogs/bridge.py"), b"bridge v10");
    assert!(!root.join("cogs/brand_new.py").exists());
    assert!(!root.join("cogs/moderation.py").exists());
    assert!(!root.join("languages/en.json").exists());
}

#[tokio::test]
async fn test_payload_copy_failure_rolls_back() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let env = env_with(
        standard_source(),
        FakeInstaller::succeeding(),
        FailingFiles::failing_on(&["update/cogs/moderation.py"]),
        ScriptedOperator::new().accept().accept(),
    );
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::RollbackOk));
    assert!(!report.passed_through(UpgradeState::ReconcilingConfig));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);
}

#[tokio::test]
async fn test_rollback_without_backup_fails_loudly() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let env = env_with(
        standard_source(),
        FakeInstaller::failing(2),
        LocalFileTransfer,
        ScriptedOperator::new().accept().accept(),
    );
    let flags = UpgradeFlags {
        no_backup: true,
        ..UpgradeFlags::default()
    };
    let report = run(root, &env, flags).await;

    assert_eq!(report.state(), Some(UpgradeState::RollbackFailed));
    assert_eq!(report.backup, Some(crate::host::BackupReport::Skipped));
    assert!(matches!(report.error, Some(UpgradeError::RollbackFailed { .. })));
}

#[tokio::test]
async fn test_backup_failure_is_fatal_unless_ignored() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;
    let before = snapshot(&LocalFileTransfer, root).await;

    let env = env_with(
        standard_source(),
        FakeInstaller::succeeding(),
        FailingFiles::failing_on(&["/old/"]),
        ScriptedOperator::new().accept().accept(),
    );
    let report = run(root, &env, UpgradeFlags::default()).await;
    assert_eq!(report.state(), Some(UpgradeState::BackupFailed));
    assert!(!report.passed_through(UpgradeState::AwaitingFinalConfirm));
    assert_eq!(snapshot(&LocalFileTransfer, root).await, before);

    let env = env_with(
        standard_source(),
        FakeInstaller::succeeding(),
        FailingFiles::failing_on(&["/old/"]),
        ScriptedOperator::new().accept().accept(),
    );
    let flags = UpgradeFlags {
        ignore_backup: true,
        ..UpgradeFlags::default()
    };
    let report = run(root, &env, flags).await;
    assert_eq!(report.state(), Some(UpgradeState::Success));
    assert_eq!(report.backup, Some(crate::host::BackupReport::FailedIgnored));
    assert!(env.operator.views().contains(&View::FinalConfirm(crate::host::BackupReport::FailedIgnored)));
}

#[tokio::test]
async fn test_reboot_required_flags_host_instead_of_reloading() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let source = FakeSource::new()
        .serve(CHECK_URL, Some("main"), check_tree(12, 10, json!([])))
        .serve(FILES_URL, Some("v12"), release_tree(12));
    let env = env(source, ScriptedOperator::new().accept().accept());
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Success));
    assert!(report.passed_through(UpgradeState::AwaitingReboot));
    assert!(!report.passed_through(UpgradeState::Reloading));
    assert!(env.host.reboot_flagged());
    assert!(env.host.reloads().is_empty());

    // The pending reboot blocks further upgrades.
    let settings = settings();
    let err = UpgradeOrchestrator::new(&env, root, &settings).run(SESSION, UpgradeFlags::default()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<UpgradeError>(), Some(UpgradeError::RebootPending)));
}

#[tokio::test]
async fn test_reload_failures_are_warnings() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let mut env = env(standard_source(), ScriptedOperator::new().accept().accept());
    env.host = RecordingHost::with_extensions(&["cogs.bridge", "cogs.sysmgr"]).broken("cogs.sysmgr");
    let report = run(root, &env, UpgradeFlags::default()).await;

    assert_eq!(report.state(), Some(UpgradeState::Success));
    assert_eq!(report.warnings, vec!["cogs.sysmgr could not be reloaded".to_string()]);
    assert_eq!(env.host.reloads(), vec!["cogs.bridge".to_string()]);
}

#[tokio::test]
async fn test_check_failure_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let env = env(FakeSource::new(), ScriptedOperator::new());
    let report = run(root, &env, UpgradeFlags::default()).await;
    assert_eq!(report.state(), Some(UpgradeState::CheckFailed));
    assert!(matches!(report.error, Some(UpgradeError::CheckFailed { .. })));

    let unconfigured = UpgradeSettings::default();
    let report = UpgradeOrchestrator::new(&env, root, &unconfigured)
        .with_confirm_timeout(TIMEOUT)
        .run(SESSION, UpgradeFlags::default())
        .await
        .unwrap();
    assert_eq!(report.state(), Some(UpgradeState::CheckFailed));
}

#[tokio::test]
async fn test_concurrent_upgrade_is_rejected() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    seed(root).await;

    let _held = UpgradeLock::acquire(&root.join("old")).await.unwrap();
    let env = env(standard_source(), ScriptedOperator::new());
    let settings = settings();
    let err = UpgradeOrchestrator::new(&env, root, &settings).run(SESSION, UpgradeFlags::default()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<UpgradeError>(), Some(UpgradeError::UpgradeInProgress)));
}
