use std::process::Command;

#[test]
fn headless_run_completes() {
    let bin = env!("CARGO_BIN_EXE_beaconsim");
    let status = Command::new(bin)
        .args(["--ticks", "120", "--no-uplink", "--seed", "7"])
        .env("RUST_LOG", "off")
        .status()
        .expect("failed to run beaconsim binary");
    assert!(status.success(), "headless run failed");
}
