use std::path::Path;
use std::time::Duration;

/// Installs `script` as the entry point through a subprocess so the test
/// process never holds a writable handle on a file it later executes.
pub fn install_app(dir: &Path, script: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let status = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(r#"printf '%s\n' "$1" > "$2/main" && chmod 755 "$2/main""#)
        .arg("sh")
        .arg(script)
        .arg(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

pub async fn wait_for_file(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never appeared", path.display());
}
