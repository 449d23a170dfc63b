use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn tree(&self) -> PathBuf {
        self.xdg_data.join("appmirror/tree")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(assert_cmd::cargo::cargo_bin!("appmirror"));
        command
            .args(args)
            .env("HOME", &self.home)
            .env("XDG_DATA_HOME", &self.xdg_data)
            .env("XDG_CONFIG_HOME", &self.xdg_config)
            .env("XDG_STATE_HOME", &self.xdg_state)
            .env_remove("APPMIRROR_PASSWORD");
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to execute appmirror: {e}"))
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap_or_else(|e| panic!("failed to spawn appmirror: {e}"));
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(input.as_bytes())
            .expect("failed to write stdin");
        child.wait_with_output().expect("failed to wait for appmirror")
    }

    /// Write a workspace record by hand, as a pull would.
    fn seed_workspace(&self, account: &str, name: &str) -> PathBuf {
        let dir = self.tree().join("Cloud").join(account).join(name);
        fs::create_dir_all(&dir).expect("failed to create workspace dir");
        fs::write(
            dir.join(".meta.json"),
            format!(r#"{{"kind":"workspace","remote_id":"w1","name":"{name}"}}"#),
        )
        .expect("failed to write workspace record");
        dir
    }
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "appmirror {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn add_platform_and_account(env: &CliTestEnv) {
    let args = ["platform", "add", "Cloud", "https://cloud.example.com/console/api/"];
    assert_success(&args, &env.run(&args));

    let args = ["account", "add", "Cloud", "ops@example.com", "--password-stdin"];
    assert_success(&args, &env.run_with_stdin(&args, "hunter2\n"));
}

#[test]
fn platform_and_account_lifecycle() {
    let env = CliTestEnv::new();
    add_platform_and_account(&env);

    let platform_dir = env.tree().join("Cloud");
    let meta = fs::read_to_string(platform_dir.join(".meta.json")).expect("platform record");
    assert!(meta.contains("\"url\": \"https://cloud.example.com\""), "{meta}");

    let secret = platform_dir.join("ops@example.com/.secret");
    let sealed = fs::read_to_string(&secret).expect("sealed secret");
    assert!(!sealed.contains("hunter2"), "secret must not be stored in plain text");
    assert!(env.tree().join(".gitignore").exists());

    let list = env.run(&["platform", "list"]);
    assert_success(&["platform", "list"], &list);
    let stdout = String::from_utf8_lossy(&list.stdout);
    assert!(stdout.contains("Cloud  https://cloud.example.com"), "{stdout}");
    assert!(stdout.contains("- ops@example.com (0 workspace(s))"), "{stdout}");

    let duplicate = env.run(&["platform", "add", "Other", "https://cloud.example.com"]);
    assert!(!duplicate.status.success());

    let remove = ["platform", "remove", "Cloud"];
    assert_success(&remove, &env.run(&remove));
    assert!(!platform_dir.exists());
}

#[test]
fn account_add_requires_password() {
    let env = CliTestEnv::new();
    let args = ["platform", "add", "Cloud", "https://cloud.example.com"];
    assert_success(&args, &env.run(&args));

    let output = env.run(&["account", "add", "Cloud", "ops@example.com"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--password-stdin"), "{stderr}");
    assert!(!env.tree().join("Cloud/ops@example.com").exists());
}

#[test]
fn offline_app_is_reported_and_chatbot_push_is_rejected() {
    let env = CliTestEnv::new();
    add_platform_and_account(&env);
    env.seed_workspace("ops@example.com", "Team");

    let status = env.run(&["status"]);
    assert_success(&["status"], &status);
    assert!(String::from_utf8_lossy(&status.stdout).contains("Nothing tracked"));

    let args = [
        "app",
        "new",
        "Cloud/ops@example.com/Team",
        "Helper",
        "--type",
        "chatbot",
    ];
    assert_success(&args, &env.run(&args));
    let app_dir = env.tree().join("Cloud/ops@example.com/Team/studio/Helper");
    assert!(app_dir.join("app.yml").exists());

    let status = env.run(&["status"]);
    assert_success(&["status"], &status);
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("local-modified"), "{stdout}");
    assert!(stdout.contains("studio/Helper"), "{stdout}");

    // Rejected before any network call, so no server is needed
    let push = env.run(&["push", "Cloud/ops@example.com/Team/studio/Helper"]);
    assert!(!push.status.success());
    let stderr = String::from_utf8_lossy(&push.stderr);
    assert!(stderr.contains("unsupported operation"), "{stderr}");
}

#[test]
fn pull_rejects_unknown_paths() {
    let env = CliTestEnv::new();
    let output = env.run(&["pull", "does-not-exist"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("is not a platform"), "{stderr}");
}

#[test]
fn push_flags_are_exclusive() {
    let env = CliTestEnv::new();
    let output = env.run(&["push", "some/app", "--force", "--pull-first"]);
    assert!(!output.status.success());
}
