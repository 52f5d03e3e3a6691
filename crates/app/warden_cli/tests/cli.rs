use assert_cmd::Command;
use predicates::prelude::*;

fn warden() -> Command {
    Command::cargo_bin("warden").unwrap()
}

#[test]
fn prints_version() {
    warden()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn hashed_password_verifies() {
    let out = warden()
        .args(["hash-password", "correct horse", "--cost", "4"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let hash = String::from_utf8(out.stdout).unwrap();
    let hash = hash.trim();
    assert!(hash.starts_with("$2"));

    warden()
        .args(["verify-password", "correct horse", hash])
        .assert()
        .success()
        .stdout(predicate::str::contains("match"));

    warden()
        .args(["verify-password", "wrong horse", hash])
        .assert()
        .failure()
        .stderr(predicate::str::contains("password does not match"));
}

#[test]
fn malformed_hash_is_an_error() {
    warden()
        .args(["verify-password", "pw", "not-a-hash"])
        .assert()
        .failure();
}

#[test]
fn fingerprint_is_sha256_hex() {
    warden()
        .args(["fingerprint", "abc"])
        .assert()
        .success()
        .stdout(predicate::eq(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\n",
        ));
}

#[test]
fn generated_token_is_printed_with_its_fingerprint() {
    warden()
        .args(["generate-token", "--user-id", "7", "--scope", "activation"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"token:\s+[A-Za-z0-9_-]{22}\n").unwrap())
        .stdout(predicate::str::is_match(r"fingerprint: [0-9a-f]{64}\n").unwrap());
}

#[test]
fn non_positive_ttl_is_rejected() {
    warden()
        .args(["generate-token", "--user-id", "1", "--ttl-secs", "0"])
        .assert()
        .failure();
}

#[test]
fn oversized_ttl_is_rejected_without_panicking() {
    warden()
        .args([
            "generate-token",
            "--user-id",
            "1",
            "--ttl-secs",
            "9223372036854775807",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--ttl-secs must be between"))
        .stderr(predicate::str::contains("panicked").not());
}
