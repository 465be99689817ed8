use std::path::PathBuf;
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ltt"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "command should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON")
}

#[test]
fn version_smoke() {
    let out = run(&["version"]);
    assert!(out.status.success(), "version should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("ltt "), "unexpected stdout: {}", stdout);
}

#[test]
fn enumerate_from_options() {
    let out = run(&[
        "enumerate",
        "--tagger",
        "hotvr_t__tau",
        "--wp",
        "Standard",
        "--period",
        "UL17,UL18",
        "--split",
        "top3",
        "--channel",
        "muo",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["task"], "hotvr_t__tau-Standard-top3");

    // 2 periods × 2 regions × 1 channel × 6 pt intervals
    let channels = v["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 24);
    assert_eq!(channels[0]["name"], "LTT_UL17_Pass_muo_pt_200to250");
    assert_eq!(channels[0]["id_factor"], 2);

    assert_eq!(v["pois"].as_array().unwrap().len(), 3 * 2 * 6);
    // TTbar and ST per scenario, period and interval
    assert_eq!(v["physics_model_maps"].as_array().unwrap().len(), 2 * 3 * 2 * 6);

    let processes = v["processes"].as_array().unwrap();
    assert_eq!(processes[0]["sample"], "TTbar__MSc_FullyMerged");
    assert_eq!(processes[0]["signal"], true);
    assert_eq!(processes.last().unwrap()["sample"], "QCD");
}

#[test]
fn working_point_by_index() {
    let out = run(&[
        "enumerate",
        "--tagger",
        "ak8_t__tau",
        "--wp",
        "0",
        "--period",
        "UL16preVFP",
        "--split",
        "top4",
        "--total-range",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["task"], "ak8_t__tau-BkgEff0p001-top4-TotalRange");
    assert_eq!(v["pois"].as_array().unwrap().len(), 4);
}

#[test]
fn unknown_tagger_fails_before_io() {
    let out = run(&[
        "enumerate",
        "--tagger",
        "ak4_b__deepjet",
        "--wp",
        "0",
        "--period",
        "UL18",
        "--split",
        "top3",
    ]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unknown tagger 'ak4_b__deepjet'"), "stderr={}", stderr);
}

#[test]
fn split_must_match_tagger_kind() {
    let out = run(&[
        "enumerate",
        "--tagger",
        "ak8_w__partnet",
        "--wp",
        "0",
        "--period",
        "UL18",
        "--split",
        "top3",
    ]);
    assert!(!out.status.success());
}

#[test]
fn config_conflicts_with_task_options() {
    let out = run(&["enumerate", "--config", "task.yaml", "--tagger", "hotvr_t__tau"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("cannot be used with"), "stderr={}", stderr);
}

#[test]
fn catalog_lists_taggers() {
    let v = stdout_json(&run(&["catalog"]));
    let taggers = v["taggers"].as_array().unwrap();
    let names: Vec<&str> = taggers.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["ak8_t__tau", "ak8_t__MDdeepak8", "hotvr_t__tau", "ak8_w__partnet"]);
    assert!(!v["systematics"].as_array().unwrap().is_empty());

    let v = stdout_json(&run(&["catalog", "--tagger", "hotvr_t__tau"]));
    let hotvr = &v["taggers"][0];
    assert_eq!(hotvr["working_points"][0]["name"], "Standard");
    assert_eq!(hotvr["working_points"][0]["cuts"]["UL17"], 0.56);
    assert_eq!(hotvr["intervals"].as_array().unwrap().last().unwrap()["total_range"], true);
}
