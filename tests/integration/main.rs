//! Integration tests for Cardkeep

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Isolated config + state directory per test
    struct Env {
        temp: TempDir,
    }

    impl Env {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let scripts = temp.path().join("scripts");
            std::fs::create_dir_all(&scripts).unwrap();
            let config = format!(
                r#"
[general]
run_log = true

[paths]
state_dir = "{state}"
generators_dir = "{scripts}"

[retry]
max_attempts = 2
initial_delay_ms = 1

[circuit]
failure_threshold = 2
open_timeout_secs = 3600
"#,
                state = temp.path().join("state").display(),
                scripts = scripts.display(),
            );
            std::fs::write(temp.path().join("config.toml"), config).unwrap();
            Self { temp }
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("cardkeep");
            cmd.arg("--config").arg(self.temp.path().join("config.toml"));
            cmd.env_remove("CARDKEEP_STATE_DIR");
            cmd
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp.path().join(rel)
        }

        fn fetch(&self, dependency: &str, output: &Path, script: &str) -> Command {
            let mut cmd = self.cmd();
            cmd.args(["fetch", dependency, "--key", "New York, NY", "--output"])
                .arg(output)
                .args(["--", "sh", "-c", script]);
            cmd
        }

        #[cfg(unix)]
        fn script(&self, name: &str, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = self.path("scripts").join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }
    }

    fn cardkeep() -> Command {
        cargo_bin_cmd!("cardkeep")
    }

    #[test]
    fn help_displays() {
        cardkeep()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Resilient fetch"));
    }

    #[test]
    fn version_displays() {
        cardkeep()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cardkeep"));
    }

    #[test]
    fn config_path() {
        let env = Env::new();
        env.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let env = Env::new();
        env.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[retry]"))
            .stdout(predicate::str::contains("max_attempts = 2"));
    }

    #[test]
    fn invalid_config_fails_with_path() {
        let env = Env::new();
        std::fs::write(env.path("config.toml"), "[retry\n").unwrap();
        env.cmd()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[cfg(unix)]
    #[test]
    fn fetch_writes_snapshot() {
        let env = Env::new();
        let output = env.path("data/weather.json");

        env.fetch("weather-api", &output, r#"echo fetching >&2; printf '{"lat":40.7}'"#)
            .assert()
            .success()
            .stdout(predicate::str::contains("fetched"));

        assert_eq!(std::fs::read_to_string(&output).unwrap(), r#"{"lat":40.7}"#);
        assert!(env.path("state/runs.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn fetch_uses_cache_on_second_run() {
        let env = Env::new();
        let output = env.path("data/weather.json");

        env.fetch("weather-api", &output, r#"printf '{"lat":40.7}'"#)
            .assert()
            .success();

        // Failing command is never run while the cache is fresh
        env.fetch("weather-api", &output, "exit 1")
            .assert()
            .success()
            .stdout(predicate::str::contains("served from cache"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_fetch_without_snapshot_fails() {
        let env = Env::new();
        let output = env.path("data/github.json");

        env.fetch("github", &output, "echo 'HTTP 401' >&2; exit 1")
            .assert()
            .failure()
            .stderr(predicate::str::contains("retries exhausted"));

        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_fetch_keeps_previous_snapshot() {
        let env = Env::new();
        let output = env.path("data/oura.json");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, r#"{"score":80}"#).unwrap();

        env.fetch("oura", &output, "exit 7")
            .assert()
            .success()
            .stdout(predicate::str::contains("kept previous snapshot"));

        assert_eq!(std::fs::read_to_string(&output).unwrap(), r#"{"score":80}"#);
    }

    #[cfg(unix)]
    #[test]
    fn mixed_output_never_replaces_snapshot() {
        let env = Env::new();
        let output = env.path("data/quote.json");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, r#"{"q":"old"}"#).unwrap();

        env.fetch("quote", &output, r#"echo 'Warning: deprecated'; printf '{"q":"new"}'"#)
            .assert()
            .success();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), r#"{"q":"old"}"#);
    }

    #[cfg(unix)]
    #[test]
    fn circuit_opens_and_resets() {
        let env = Env::new();
        let output = env.path("data/soundcloud.json");

        for _ in 0..2 {
            env.fetch("soundcloud", &output, "exit 1").assert().failure();
        }

        env.cmd()
            .args(["circuit", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("soundcloud"))
            .stdout(predicate::str::contains("open"));

        env.fetch("soundcloud", &output, r#"printf '{}'"#)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Circuit open"));

        env.cmd()
            .args(["circuit", "reset", "soundcloud"])
            .assert()
            .success();

        env.fetch("soundcloud", &output, r#"printf '{}'"#)
            .assert()
            .success();
    }

    #[test]
    fn circuit_status_empty() {
        let env = Env::new();
        env.cmd()
            .args(["circuit", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No circuit records"));
    }

    #[cfg(unix)]
    #[test]
    fn generate_then_skip() {
        let env = Env::new();
        let script = env.script("card.sh", r#"printf '<svg>%s</svg>' "$(cat "$1")""#);
        let input = env.path("weather.txt");
        std::fs::write(&input, "12C").unwrap();
        let output = env.path("cards/weather.svg");

        let generate = || {
            let mut cmd = env.cmd();
            cmd.arg("generate")
                .arg(&script)
                .arg("--input")
                .arg(&input)
                .arg("--output")
                .arg(&output);
            cmd
        };

        generate()
            .assert()
            .success()
            .stdout(predicate::str::contains("Generated"));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "<svg>12C</svg>");

        generate()
            .assert()
            .success()
            .stdout(predicate::str::contains("Skipping"));

        std::fs::remove_file(&output).unwrap();
        generate()
            .assert()
            .success()
            .stdout(predicate::str::contains("Generated"));
    }

    #[cfg(unix)]
    #[test]
    fn generate_rejects_script_outside_allow_list() {
        let env = Env::new();
        let outside = env.path("evil.sh");
        std::fs::write(&outside, "#!/bin/sh\necho '<svg></svg>'\n").unwrap();

        env.cmd()
            .arg("generate")
            .arg(&outside)
            .arg("--output")
            .arg(env.path("x.svg"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("outside the allowed directory"));
    }

    #[cfg(unix)]
    #[test]
    fn generate_failure_keeps_existing_card() {
        let env = Env::new();
        let script = env.script("broken.sh", "echo 'KeyError' >&2; exit 1");
        let output = env.path("cards/health.svg");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, "<svg>old</svg>").unwrap();

        env.cmd()
            .arg("generate")
            .arg(&script)
            .arg("--output")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains("Kept existing"));

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "<svg>old</svg>");
    }

    #[cfg(unix)]
    #[test]
    fn shared_script_skips_each_unchanged_output() {
        let env = Env::new();
        let script = env.script("card.sh", r#"printf '<svg>%s</svg>' "$(cat "$1")""#);
        let mut cards = Vec::new();
        for name in ["weather", "location"] {
            let input = env.path(&format!("{}.txt", name));
            std::fs::write(&input, name).unwrap();
            cards.push((input, env.path(&format!("cards/{}.svg", name))));
        }

        for expected in ["Generated", "Skipping", "Skipping"] {
            for (input, output) in &cards {
                env.cmd()
                    .arg("generate")
                    .arg(&script)
                    .arg("--input")
                    .arg(input)
                    .arg("--output")
                    .arg(output)
                    .assert()
                    .success()
                    .stdout(predicate::str::contains(expected));
            }
        }

        assert_eq!(
            std::fs::read_to_string(env.path("cards/location.svg")).unwrap(),
            "<svg>location</svg>"
        );
    }

    #[cfg(unix)]
    #[test]
    fn generate_rejects_unlisted_interpreter() {
        let env = Env::new();
        let script = env.script("card.sh", "printf '<svg></svg>'");
        let marker = env.path("ran");
        let fake = env.path("fake-interpreter");
        std::fs::write(&fake, format!("#!/bin/sh
touch {}
", marker.display())).unwrap();

        env.cmd()
            .arg("generate")
            .arg(&script)
            .arg("--output")
            .arg(env.path("x.svg"))
            .arg("--interpreter")
            .arg(&fake)
            .assert()
            .failure()
            .stderr(predicate::str::contains("is not allowed"));

        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn svg_with_event_handler_keeps_existing_card() {
        let env = Env::new();
        let script = env.script("card.sh", r#"printf '<svg onload="alert(1)"></svg>'"#);
        let output = env.path("cards/weather.svg");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, "<svg>old</svg>").unwrap();

        env.cmd()
            .arg("generate")
            .arg(&script)
            .arg("--output")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains("Kept existing"));

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "<svg>old</svg>");
    }

    #[cfg(unix)]
    #[test]
    fn runs_flags_repeated_failures() {
        let env = Env::new();
        let output = env.path("data/oura.json");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, r#"{"score":80}"#).unwrap();

        env.fetch("github", &env.path("data/github.json"), r#"printf '{}'"#)
            .assert()
            .success();
        for _ in 0..3 {
            env.fetch("oura", &output, "exit 1").assert().success();
        }

        env.cmd()
            .arg("runs")
            .assert()
            .success()
            .stdout(predicate::str::contains("github"))
            .stdout(predicate::str::contains("failed 3 times in a row"));

        let listing = env
            .cmd()
            .args(["runs", "--failing", "--format", "json"])
            .output()
            .unwrap();
        assert!(listing.status.success());
        let steps: serde_json::Value = serde_json::from_slice(&listing.stdout).unwrap();
        let steps = steps.as_array().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0]["name"], "oura");
        assert_eq!(steps[0]["failure_streak"], 3);
    }

    #[test]
    fn runs_without_history() {
        let env = Env::new();
        env.cmd()
            .arg("runs")
            .assert()
            .success()
            .stdout(predicate::str::contains("No runs recorded"));
    }

    #[test]
    fn cache_purge_on_empty_state() {
        let env = Env::new();
        env.cmd()
            .args(["cache", "purge"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Purged 0"));
    }
}
