use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_random(path: &std::path::Path, bytes: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    std::fs::write(path, data).unwrap();
}

fn skyfs() -> Command {
    Command::cargo_bin("skyfs").unwrap()
}

/// Runs keygen and returns the hex Ed25519 public key it printed.
fn keygen(dir: &assert_fs::TempDir, file: &str, id: &str) -> String {
    let out = skyfs()
        .current_dir(dir.path())
        .args(["keygen", "--out", file, "--id", id])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["id"], id);
    v["publicKey"].as_str().unwrap().to_string()
}

#[test]
fn contract_sign_and_verify_flow() {
    let td = assert_fs::TempDir::new().unwrap();
    let renter_pk = keygen(&td, "renter.json", "r1");
    let provider_pk = keygen(&td, "provider.json", "p1");

    skyfs()
        .current_dir(td.path())
        .args(["contract", "new", "--renter", "r1", "--provider", "p1", "--space", "1048576", "--out", "c.json"])
        .assert()
        .success();
    td.child("c.json").assert(predicate::str::contains("\"storageSpace\": 1048576"));

    // half signed is not enough
    skyfs()
        .current_dir(td.path())
        .args(["contract", "sign", "--contract", "c.json", "--key", "renter.json", "--as", "renter"])
        .assert()
        .success();
    skyfs()
        .current_dir(td.path())
        .args(["contract", "verify", "--contract", "c.json", "--renter-key", &renter_pk, "--provider-key", &provider_pk])
        .assert()
        .failure()
        .stderr(predicate::str::contains("provider signature"));

    skyfs()
        .current_dir(td.path())
        .args(["contract", "sign", "--contract", "c.json", "--key", "provider.json", "--as", "provider"])
        .assert()
        .success();
    skyfs()
        .current_dir(td.path())
        .args(["contract", "verify", "--contract", "c.json", "--renter-key", &renter_pk, "--provider-key", &provider_pk])
        .assert()
        .success()
        .stdout(predicate::str::contains("FULLY EXECUTED"));

    // edit a term after signing
    let path = td.child("c.json");
    let text = std::fs::read_to_string(path.path()).unwrap();
    std::fs::write(path.path(), text.replace("\"storageSpace\": 1048576", "\"storageSpace\": 2097152")).unwrap();
    skyfs()
        .current_dir(td.path())
        .args(["contract", "verify", "--contract", "c.json", "--renter-key", &renter_pk, "--provider-key", &provider_pk])
        .assert()
        .failure()
        .stderr(predicate::str::contains("renter signature"));
}

#[test]
fn signing_with_the_wrong_party_key_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    keygen(&td, "renter.json", "r1");
    skyfs()
        .current_dir(td.path())
        .args(["contract", "new", "--renter", "r1", "--provider", "p1", "--space", "10", "--out", "c.json"])
        .assert()
        .success();
    skyfs()
        .current_dir(td.path())
        .args(["contract", "sign", "--contract", "c.json", "--key", "renter.json", "--as", "provider"])
        .assert()
        .failure();
}

#[test]
fn provider_init_stats_audit() {
    let td = assert_fs::TempDir::new().unwrap();
    let home = td.child("node");
    skyfs()
        .args(["provider", "init", "--home", home.path().to_str().unwrap(), "--id", "p1", "--capacity", "1000000"])
        .assert()
        .success();
    home.child("provider.json").assert(predicate::path::exists());
    home.child("identity.json").assert(predicate::path::exists());

    skyfs()
        .args(["provider", "stats", "--home", home.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"providerId\": \"p1\"").and(predicate::str::contains("\"storageReserved\": 0")));

    skyfs()
        .args(["provider", "audit", "--home", home.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("missingOnDisk"));

    // a stray block file is drift
    home.child("blocks").child("r1").create_dir_all().unwrap();
    home.child("blocks").child("r1").child("orphan").write_binary(b"x").unwrap();
    skyfs()
        .args(["provider", "audit", "--home", home.path().to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("orphan"));
}

#[test]
fn simulate_survives_two_lost_blocks() {
    let td = assert_fs::TempDir::new().unwrap();
    let input = td.child("input.bin");
    write_random(input.path(), 1 << 20, 11);
    skyfs()
        .current_dir(td.path())
        .args([
            "simulate",
            "--providers", "6",
            "--capacity", "4194304",
            "--input", "input.bin",
            "--k", "4",
            "--m", "2",
            "--drop", "2",
            "--work", "sim",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn simulate_refuses_more_drops_than_parity() {
    let td = assert_fs::TempDir::new().unwrap();
    let input = td.child("input.bin");
    write_random(input.path(), 4096, 12);
    skyfs()
        .current_dir(td.path())
        .args(["simulate", "--capacity", "1048576", "--input", "input.bin", "--m", "2", "--drop", "3"])
        .assert()
        .failure();
}
