#![cfg(unix)]

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn action_web(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_action_web"))
        .arg("--home")
        .arg(home)
        .args(args)
        .env_remove("ACTION_WEB_BACKGROUND")
        .env_remove("ACTION_WEB_PORT")
        .env_remove("ACTION_WEB_HOST")
        .env("ACTION_WEB_AUTH", "false")
        .output()
        .expect("failed to run action_web")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn wait_until_gone(paths: &[&Path], timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while paths.iter().any(|p| p.exists()) {
        assert!(
            Instant::now() < deadline,
            "instance files were not cleaned up: {:?}",
            paths
        );
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn background_server_starts_reports_and_stops() {
    let home = TempDir::new().unwrap();
    let instance = home.path().join("instance");
    let pid_file = instance.join("web.pid");
    let info_file = instance.join("server-info.json");
    let port = free_port();

    let started = action_web(home.path(), &["start", "--port", &port.to_string()]);
    assert!(
        started.status.success(),
        "start failed: {}",
        String::from_utf8_lossy(&started.stderr)
    );
    let url = format!("http://localhost:{}", port);
    assert!(stdout(&started).contains(&url), "{}", stdout(&started));
    assert!(pid_file.exists());
    assert!(info_file.exists());

    let status = action_web(home.path(), &["status"]);
    assert!(stdout(&status).contains("running in the background"));
    assert!(stdout(&status).contains(&url));

    let again = action_web(home.path(), &["start", "--port", &port.to_string()]);
    assert!(!again.status.success());

    let stopped = action_web(home.path(), &["stop"]);
    assert!(stopped.status.success());
    assert!(stdout(&stopped).contains("successfully shut down"));

    wait_until_gone(&[&pid_file, &info_file], Duration::from_secs(15));

    let idle = action_web(home.path(), &["stop"]);
    assert!(idle.status.success());
    assert!(stdout(&idle).contains("No active web server"));

    let status = action_web(home.path(), &["status"]);
    assert!(stdout(&status).contains("not running"));
}
