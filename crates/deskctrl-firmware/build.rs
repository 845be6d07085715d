use std::process::Command;

/// Env vars forwarded from `.env` (or the environment) into `option_env!`.
const FORWARDED: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASS",
    "MQTT_HOST",
    "MQTT_PORT",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
];

fn main() {
    let _ = dotenvy::dotenv();

    for key in FORWARDED {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    // Build identity published to the `git` topic: short hash, `-dirty`
    // suffixed when the tree has local modifications.
    let hash = git_output(&["rev-parse", "--short", "HEAD"]);
    let dirty = git_output(&["status", "--porcelain"]).map(|s| !s.is_empty());
    if let Some(hash) = hash {
        let marker = if dirty.unwrap_or(false) { "-dirty" } else { "" };
        println!("cargo:rustc-env=DESKCTRL_GIT_DESCRIBE={hash}{marker}");
    }
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8(output.stdout).ok()?.trim().to_string())
}
