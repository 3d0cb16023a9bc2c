use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn ledger_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dmarc-ledger"));
    cmd.current_dir(home);
    cmd.env("HOME", home);
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("DMARC_LEDGER_CONFIG");
    cmd.env_remove("DMARC_LEDGER_REPORT_HTML");
    cmd.env_remove("DMARC_LEDGER_REPORT_HTML_PATH");
    cmd.env_remove("DMARC_LEDGER_PARSE_TIMEZONE");
    cmd.env_remove("DMARC_LEDGER_PARSE_SKIP_INVALID");
    cmd.env_remove("DMARC_LEDGER_AGGREGATE_UNKNOWN_OUTCOME");
    cmd
}

fn show_config(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.arg("--show-config").output().expect("run dmarc-ledger");
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).expect("parse json")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!(
        "dmarc-ledger-config-test-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

#[test]
fn defaults_without_config_file() {
    let home = make_temp_home();
    let v = show_config(&mut ledger_cmd(&home));
    assert_eq!(v["report"]["html"], true);
    assert_eq!(v["report"]["html_path"], "report.html");
    assert_eq!(v["parse"]["timezone"], "local");
    assert_eq!(v["parse"]["skip_invalid"], false);
    assert_eq!(v["aggregate"]["unknown_outcome"], "bucket");
    assert!(v.get("config_path").is_none());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn home_config_then_env_then_flags() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/dmarc-ledger/config.toml"),
        br#"
[report]
html_path = "from-file.html"

[parse]
timezone = "utc"
skip_invalid = true
"#,
    );

    let v = show_config(&mut ledger_cmd(&home));
    assert_eq!(v["report"]["html_path"], "from-file.html");
    assert_eq!(v["parse"]["timezone"], "utc");
    assert_eq!(v["parse"]["skip_invalid"], true);
    assert!(v["config_path"].as_str().is_some_and(|p| p.ends_with("config.toml")));

    let v = show_config(
        ledger_cmd(&home)
            .env("DMARC_LEDGER_REPORT_HTML_PATH", "from-env.html")
            .env("DMARC_LEDGER_PARSE_SKIP_INVALID", "off"),
    );
    assert_eq!(v["report"]["html_path"], "from-env.html");
    assert_eq!(v["parse"]["skip_invalid"], false);
    assert_eq!(v["parse"]["timezone"], "utc");

    let v = show_config(
        ledger_cmd(&home)
            .env("DMARC_LEDGER_REPORT_HTML_PATH", "from-env.html")
            .args(["--html", "from-flag.html", "--csv-only"]),
    );
    assert_eq!(v["report"]["html_path"], "from-flag.html");
    assert_eq!(v["report"]["html"], false);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn explicit_config_path_wins_over_home() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/dmarc-ledger/config.toml"),
        b"[aggregate]\nunknown_outcome = \"bucket\"\n",
    );
    let custom = home.join("custom.toml");
    write_file(&custom, b"[aggregate]\nunknown_outcome = \"reject\"\n");

    let v = show_config(ledger_cmd(&home).env("DMARC_LEDGER_CONFIG", &custom));
    assert_eq!(v["aggregate"]["unknown_outcome"], "reject");

    let other = home.join("other.toml");
    write_file(&other, b"[report]\nhtml = false\n");
    let v = show_config(
        ledger_cmd(&home)
            .env("DMARC_LEDGER_CONFIG", &custom)
            .arg("--config")
            .arg(&other),
    );
    assert_eq!(v["report"]["html"], false);
    assert_eq!(v["aggregate"]["unknown_outcome"], "bucket");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_config_is_a_usage_error() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/dmarc-ledger/config.toml"),
        b"[parse]\ntimezone = \"mars\"\n",
    );
    let out = ledger_cmd(&home)
        .arg("--show-config")
        .output()
        .expect("run dmarc-ledger");
    assert_eq!(out.status.code(), Some(1));

    let home2 = make_temp_home();
    let out = ledger_cmd(&home2)
        .env("DMARC_LEDGER_REPORT_HTML", "sometimes")
        .arg("--show-config")
        .output()
        .expect("run dmarc-ledger");
    assert_eq!(out.status.code(), Some(1));

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&home2);
}

#[test]
fn config_can_select_csv_only_mode() {
    let home = make_temp_home();
    write_file(&home.join(".config/dmarc-ledger/config.toml"), b"[report]\nhtml = false\n");
    write_file(
        &home.join("r.xml"),
        br#"<feedback>
  <report_metadata><date_range><begin>1700000000</begin><end>1700086399</end></date_range></report_metadata>
  <record>
    <row><source_ip>192.0.2.1</source_ip><count>1</count>
      <policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>pass</spf></policy_evaluated>
    </row>
    <identifiers><header_from>example.org</header_from></identifiers>
  </record>
</feedback>"#,
    );

    let out = ledger_cmd(&home)
        .args(["ledger.csv", "r.xml"])
        .output()
        .expect("run dmarc-ledger");
    assert!(out.status.success());
    assert!(home.join("ledger.csv").exists());
    assert!(!home.join("report.html").exists());

    let _ = std::fs::remove_dir_all(&home);
}
