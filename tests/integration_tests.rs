//! Integration tests for the merge-agent CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "WEBHOOK_SECRET",
    "GITLAB_URL",
    "GITLAB_TOKEN",
    "WORKSPACE_ROOT",
    "AGENT_TIMEOUT_SECS",
    "DEFAULT_PROVIDER",
    "CLAUDE_CMD",
    "CODEX_CMD",
    "BIND_ADDR",
    "CLONE_DEPTH",
    "GIT_AUTHOR_NAME",
    "GIT_AUTHOR_EMAIL",
    "BRANCH_PREFIX",
    "LOG_FORMAT",
    "MERGE_AGENT_CONFIG",
];

/// A merge-agent command isolated from the caller's configuration.
fn merge_agent(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("merge-agent");
    cmd.current_dir(dir.path());
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("extract"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir).arg("--version").assert().success();
    }
}

// =============================================================================
// Instruction extraction
// =============================================================================

mod extract {
    use super::*;

    #[test]
    fn test_extract_prints_json() {
        let dir = TempDir::new().unwrap();
        let output = merge_agent(&dir)
            .args(["extract", "Hey @Claude[model=opus,timeout=120] add a LICENSE file"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["provider"], "claude");
        assert_eq!(json["model"], "opus");
        assert_eq!(json["timeout_secs"], 120);
        assert_eq!(json["command"], "add a LICENSE file");
    }

    #[test]
    fn test_extract_without_mention_fails() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["extract", "mail me at dev@claude.example"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No instruction found"));
    }
}

// =============================================================================
// Payload signing
// =============================================================================

mod sign {
    use super::*;

    #[test]
    fn test_sign_payload() {
        let dir = TempDir::new().unwrap();
        let payload = dir.path().join("payload.json");
        fs::write(&payload, r#"{"object_kind":"issue"}"#).unwrap();

        merge_agent(&dir)
            .args(["sign", "--secret", "s3cret", "payload.json"])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"^sha256=[0-9a-f]{64}\n$").unwrap());
    }

    #[test]
    fn test_sign_is_stable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p.json"), "{}").unwrap();
        let first = merge_agent(&dir)
            .args(["sign", "--secret", "k", "p.json"])
            .output()
            .unwrap();
        let second = merge_agent(&dir)
            .args(["sign", "--secret", "k", "p.json"])
            .output()
            .unwrap();
        assert_eq!(first.stdout, second.stdout);
    }

    #[test]
    fn test_sign_missing_file() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["sign", "--secret", "k", "missing.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read payload file"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains("bind_addr = \"0.0.0.0:8080\""))
            .stdout(predicate::str::contains("default_provider = \"claude\""));
    }

    #[test]
    fn test_config_show_reads_file_and_redacts() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("merge-agent.toml"),
            "[server]\nwebhook_secret = \"super-secret\"\n\n[workspace]\nbranch_prefix = \"bots\"\n",
        )
        .unwrap();

        merge_agent(&dir)
            .args(["config", "show"])
            .env("GITLAB_TOKEN", "glpat-very-secret")
            .assert()
            .success()
            .stdout(predicate::str::contains("branch_prefix = \"bots\""))
            .stdout(predicate::str::contains("super-secret").not())
            .stdout(predicate::str::contains("glpat-very-secret").not());
    }

    #[test]
    fn test_config_explicit_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("custom.toml"), "[agent]\ntimeout_secs = 42\n").unwrap();

        merge_agent(&dir)
            .args(["--config", "custom.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout_secs = 42"));
    }

    #[test]
    fn test_config_validate_warns_about_secret() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("webhook secret is empty"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["config", "validate"])
            .env("WEBHOOK_SECRET", "s")
            .env("GITLAB_TOKEN", "t")
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_broken_dotenv() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "WEBHOOK_SECRET=s\nthis line is not valid\n").unwrap();
        merge_agent(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("failed to load .env file"));
    }

    #[test]
    fn test_config_invalid_env_value() {
        let dir = TempDir::new().unwrap();
        merge_agent(&dir)
            .args(["config", "show"])
            .env("AGENT_TIMEOUT_SECS", "soon")
            .assert()
            .failure()
            .stderr(predicate::str::contains("AGENT_TIMEOUT_SECS"));
    }

    #[test]
    fn test_config_malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("merge-agent.toml"), "[server\n").unwrap();
        merge_agent(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse"));
    }
}
