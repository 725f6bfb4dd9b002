use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const MADS: &str = "http://www.loc.gov/mads/rdf/v1#";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const STATUS: &str = "http://id.loc.gov/ontologies/RecordInfo#recordStatus";

fn authdocs_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_authdocs"))
}

fn write_genreforms(dir: &Path, count: usize) -> PathBuf {
    let mut content = String::new();
    for i in 0..count {
        let gf = format!("http://id.loc.gov/authorities/genreForms/gf{}", i);
        content.push_str(&format!("<{gf}> <{MADS}authoritativeLabel> \"Form {i}\" .\n"));
        content.push_str(&format!("<{gf}> <{RDF_TYPE}> <{MADS}GenreForm> .\n"));
        content.push_str(&format!("<{gf}> <{MADS}adminMetadata> _:m{i} .\n"));
        content.push_str(&format!("<{gf}> <{MADS}hasExactExternalAuthority> <http://example.org/{i}> .\n"));
    }
    content.push_str(&format!("_:m0 <{STATUS}> \"deprecated\" .\n"));
    let path = dir.join("lcgft.nt");
    fs::write(&path, content).expect("write dump");
    path
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn output_lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .expect("read output")
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect()
}

#[test]
fn convert_writes_documents_and_json_stats() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 5);
    let out = Command::new(authdocs_bin())
        .arg("convert")
        .arg("--vocabulary")
        .arg("lcgft")
        .arg("--source")
        .arg(&source)
        .arg("--chunk-size")
        .arg("4")
        .arg("--json")
        .output()
        .expect("run convert");
    assert!(
        out.status.success(),
        "convert failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stats: serde_json::Value = serde_json::from_slice(&out.stdout).expect("stats json");
    assert_eq!(stats["documents_written"], 4);
    assert_eq!(stats["statements_ignored"], 5);
    assert_eq!(stats["rejections"]["deprecated"], 1);

    let docs = output_lines(&dir.path().join("lcgft.json"));
    assert_eq!(docs.len(), 4);
    assert_eq!(docs[0]["authority_code"], "lcgft");
    assert_eq!(docs[0]["term_type"], "genreform");
}

#[test]
fn unknown_vocabulary_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 1);
    let out = Command::new(authdocs_bin())
        .args(["convert", "--vocabulary", "mesh", "--source"])
        .arg(&source)
        .output()
        .expect("run convert");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("mesh"), "stderr: {}", stderr);
    assert!(!dir.path().join("lcgft.json").exists());
}

#[test]
fn strategies_through_run_from_args() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 12);
    let mut results = Vec::new();
    for strategy in ["sort-merge", "store", "bucketed"] {
        let output = dir.path().join(format!("{}.json", strategy));
        let store = dir.path().join(format!("{}.store", strategy));
        authdocs_cli::run_from_args([
            "authdocs",
            "convert",
            "--vocabulary",
            "lcgft",
            "--source",
            &arg(&source),
            "--output",
            &arg(&output),
            "--strategy",
            strategy,
            "--store",
            &arg(&store),
            "--buckets",
            "3",
            "--no-compress",
        ])
        .unwrap();
        let mut uris: Vec<String> = output_lines(&output)
            .iter()
            .map(|d| d["uri"].as_str().unwrap().to_string())
            .collect();
        uris.sort();
        results.push(uris);
    }
    assert_eq!(results[0].len(), 11);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
}

#[test]
fn bad_strategy_is_rejected() {
    let err = authdocs_cli::run_from_args([
        "authdocs",
        "convert",
        "--vocabulary",
        "lcgft",
        "--source",
        "lcgft.nt",
        "--strategy",
        "quicksort",
    ])
    .unwrap_err();
    assert!(err.to_string().contains("quicksort"));
}

#[test]
fn resume_requires_store() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 1);
    let err = authdocs_cli::run_from_args([
        "authdocs",
        "convert",
        "--vocabulary",
        "lcgft",
        "--source",
        &arg(&source),
        "--resume",
    ])
    .unwrap_err();
    assert!(err.to_string().contains("--store"));
}

#[test]
fn saved_config_drives_convert() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 3);
    let config = dir.path().join("lcgft.config.json");
    let output = dir.path().join("from-config.json");
    authdocs_cli::run_from_args([
        "authdocs",
        "config",
        "--vocabulary",
        "lcgft",
        "--source",
        &arg(&source),
        "--output",
        &arg(&output),
        "--lenient",
        "--save",
        &arg(&config),
    ])
    .unwrap();
    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
    assert_eq!(saved["vocabulary"], "lcgft");
    assert_eq!(saved["on_unresolvable"], "skip");

    authdocs_cli::run_from_args(["authdocs", "convert", "--config", &arg(&config)]).unwrap();
    assert_eq!(output_lines(&output).len(), 2);
}

#[test]
fn filter_then_prune_and_compact() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_genreforms(dir.path(), 6);
    let filtered = dir.path().join("clean.nt");
    authdocs_cli::run_from_args(["authdocs", "filter", &arg(&source), &arg(&filtered)]).unwrap();
    let kept = fs::read_to_string(&filtered).unwrap();
    assert_eq!(kept.lines().count(), 19);
    assert!(!kept.contains("hasExactExternalAuthority"));

    let store = dir.path().join("acc.store");
    authdocs_cli::run_from_args([
        "authdocs",
        "convert",
        "--vocabulary",
        "lcgft",
        "--source",
        &arg(&filtered),
        "--store",
        &arg(&store),
    ])
    .unwrap();
    authdocs_cli::run_from_args(["authdocs", "prune", "--store", &arg(&store)]).unwrap();
    authdocs_cli::run_from_args(["authdocs", "compact", "--store", &arg(&store), "--json"])
        .unwrap();

    // resuming a finished run re-projects the pruned store without reading new lines
    let output = dir.path().join("resumed.json");
    authdocs_cli::run_from_args([
        "authdocs",
        "convert",
        "--vocabulary",
        "lcgft",
        "--source",
        &arg(&filtered),
        "--output",
        &arg(&output),
        "--store",
        &arg(&store),
        "--resume",
    ])
    .unwrap();
    assert_eq!(output_lines(&output).len(), 5);
}

#[test]
fn vocabularies_lists_builtin_table() {
    let out = Command::new(authdocs_bin())
        .args(["vocabularies", "--json"])
        .output()
        .expect("run vocabularies");
    assert!(out.status.success());
    let table: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let codes: Vec<&str> = table
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["lcgft", "lctgm", "lcsh", "naf", "aat"]);
}

#[test]
fn version_prints_package_version() {
    let out = Command::new(authdocs_bin())
        .arg("version")
        .output()
        .expect("run version");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("authdocs "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
