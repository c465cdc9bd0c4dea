//! Integration tests for lambda-pack

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serial_test::serial;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Command running in `dir` with a clean logging and config environment
    fn lambda_pack(dir: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("lambda-pack");
        cmd.current_dir(dir)
            .env("LAMBDA_PACK_CONFIG", dir.join("no-config.toml"))
            .env_remove("TF_LAMBDA_PACKAGE_LOG_LEVEL")
            .env_remove("TF_LAMBDA_PACKAGE_PATTERN_COMMENTS")
            .env_remove("TF_RECREATE_MISSING_LAMBDA_PACKAGE");
        cmd
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/lib")).unwrap();
        fs::write(temp.path().join("src/main.sh"), "echo handler\n").unwrap();
        fs::write(temp.path().join("src/lib/util.sh"), "true\n").unwrap();
        temp
    }

    fn prepare(dir: &Path, request: &str) -> serde_json::Value {
        let output = lambda_pack(dir)
            .arg("prepare")
            .write_stdin(request)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        lambda_pack(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("reproducible deployment archives"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        lambda_pack(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lambda-pack"));
    }

    #[test]
    fn hash_prints_base64_sha256() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("payload"), "hello").unwrap();
        lambda_pack(temp.path())
            .args(["hash", "payload"])
            .assert()
            .success()
            .stdout("LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=\n");
    }

    #[test]
    fn zip_is_reproducible() {
        let temp = project();
        for name in ["a.zip", "b.zip"] {
            lambda_pack(temp.path())
                .args(["zip", name, "src", "-t", "1700000000"])
                .assert()
                .success();
        }
        assert_eq!(
            fs::read(temp.path().join("a.zip")).unwrap(),
            fs::read(temp.path().join("b.zip")).unwrap()
        );
    }

    #[test]
    fn zip_rejects_pre_1980_date() {
        let temp = project();
        lambda_pack(temp.path())
            .args(["zip", "old.zip", "src", "-t", "1975-01-01T00:00:00Z"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("before 1980"));
        assert!(!temp.path().join("old.zip").exists());
        assert!(!temp.path().join("old.zip.tmp").exists());
    }

    #[test]
    #[serial]
    fn prepare_then_build_uses_cache() {
        let temp = project();
        let request = r#"{"runtime": "provided.al2", "source_path": "src", "artifacts_dir": "builds", "hash_extra": "v1", "recreate_missing_package": "true"}"#;

        let response = prepare(temp.path(), request);
        let filename = response["filename"].as_str().unwrap().to_string();
        let plan_file = response["build_plan_filename"].as_str().unwrap().to_string();
        let timestamp = response["timestamp"].as_str().unwrap().to_string();
        assert_eq!(response["was_missing"], "true");
        assert!(filename.starts_with("builds/"));
        assert!(temp.path().join(&plan_file).is_file());

        lambda_pack(temp.path())
            .args(["build", &plan_file, "-t", &timestamp])
            .assert()
            .success()
            .stderr(predicate::str::contains("Created"));
        assert!(temp.path().join(&filename).is_file());

        lambda_pack(temp.path())
            .args(["build", &plan_file, "-t", &timestamp])
            .assert()
            .success()
            .stderr(predicate::str::contains("Reused"));

        let again = prepare(temp.path(), request);
        assert_eq!(again["filename"], response["filename"]);
        assert_eq!(again["was_missing"], "false");
    }

    #[test]
    #[serial]
    fn hash_extra_changes_filename() {
        let temp = project();
        let v1 = prepare(
            temp.path(),
            r#"{"runtime": "provided.al2", "source_path": "src", "hash_extra": "v1"}"#,
        );
        let v2 = prepare(
            temp.path(),
            r#"{"runtime": "provided.al2", "source_path": "src", "hash_extra": "v2"}"#,
        );
        assert_ne!(v1["filename"], v2["filename"]);
        assert_eq!(
            v1["timestamp"],
            "<WARNING: Missing lambda zip artifacts wouldn't be restored>"
        );
    }

    #[test]
    #[serial]
    fn command_claim_builds_generated_output() {
        let temp = project();
        let request = r#"{
            "runtime": "provided.al2",
            "source_path": "[{\"path\": \"src\", \"commands\": [\"mkdir -p dist\", \"cp main.sh dist/bootstrap\", \"cd dist\", \":zip\"]}]"
        }"#;
        let response = prepare(temp.path(), request);
        let plan_file = response["build_plan_filename"].as_str().unwrap().to_string();

        lambda_pack(temp.path())
            .args(["build", &plan_file, "-t", "0"])
            .assert()
            .success();

        let archive = fs::File::open(temp.path().join(response["filename"].as_str().unwrap())).unwrap();
        let mut archive = zip::ZipArchive::new(archive).unwrap();
        assert!(archive.by_name("bootstrap").is_ok());
    }

    #[test]
    fn missing_source_path_fails() {
        let temp = TempDir::new().unwrap();
        lambda_pack(temp.path())
            .arg("prepare")
            .write_stdin(r#"{"runtime": "python3.12", "source_path": "nope"}"#)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Could not locate source_path"));
    }

    #[test]
    fn invalid_boolean_env_fails() {
        let temp = project();
        lambda_pack(temp.path())
            .env("TF_RECREATE_MISSING_LAMBDA_PACKAGE", "perhaps")
            .arg("prepare")
            .write_stdin(r#"{"runtime": "provided.al2", "source_path": "src"}"#)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported boolean value"));
    }
}
