use std::fs;
use std::sync::Arc;

use envscope_core::{ConsoleError, Explorer, SnapshotIndex, Source, DEFAULT_VIEW_LIMIT};

const APP: &str = "\
# envscope snapshot v1
d|0|/
d|0|/app
f|120|/app/main.py
d|0|/app/lib
f|3|/app/lib/a.py
d|0|/app/lib/deep
f|1|/app/lib/deep/b.py
d|0|/usr
d|0|/usr/bin
f|900|/usr/bin/jq
";

fn explorer(snapshot: &str) -> Explorer {
    let index = SnapshotIndex::from_reader(snapshot.as_bytes()).unwrap();
    Explorer::new(Arc::new(index), DEFAULT_VIEW_LIMIT)
}

#[test]
fn app_scenario_lists_two_children_directory_first() {
    let ex = explorer(APP);
    let items = ex.list("/app", Source::Build).unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "lib");
    assert!(items[0].is_dir);
    assert_eq!(items[0].size, 0);
    assert_eq!(items[1].name, "main.py");
    assert_eq!(items[1].size, 120);
    assert_eq!(items[1].path, "/app/main.py");
}

#[test]
fn build_listing_is_exactly_the_direct_children() {
    let ex = explorer(APP);
    let index = ex.snapshot();

    for dir in ["/", "/app", "/app/lib", "/app/lib/deep", "/usr", "/usr/bin"] {
        let mut listed: Vec<String> = ex
            .list(dir, Source::Build)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        listed.sort();

        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        let mut expected: Vec<String> = APP
            .lines()
            .filter_map(|l| l.splitn(3, '|').nth(2))
            .filter(|p| *p != "/" && p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
            .map(String::from)
            .collect();
        expected.sort();

        assert_eq!(listed, expected, "children of {dir}");
        assert!(index.get(dir).is_some());
    }
}

#[test]
fn build_paths_outside_the_capture_are_not_in_snapshot() {
    let ex = explorer(APP);
    for path in ["/var", "/app/missing", "/usr/bin/jq/x"] {
        let err = ex.list(path, Source::Build).unwrap_err();
        assert!(matches!(err, ConsoleError::NotInSnapshot(_)), "{path}: {err}");
    }
}

#[test]
fn build_file_is_not_a_directory() {
    let ex = explorer(APP);
    let err = ex.list("/usr/bin/jq", Source::Build).unwrap_err();
    assert!(matches!(err, ConsoleError::NotADirectory(_)));
}

#[test]
fn build_source_never_yields_content_or_mutation() {
    let ex = explorer(APP);
    for path in ["/app/main.py", "/not/captured"] {
        assert_eq!(ex.view(path, Source::Build).unwrap_err().kind(), "policy_violation");
        assert_eq!(ex.download(path, Source::Build).unwrap_err().kind(), "policy_violation");
        assert_eq!(ex.delete(path, Source::Build).unwrap_err().kind(), "policy_violation");
    }
}

#[test]
fn empty_snapshot_misses_everything() {
    let ex = Explorer::new(Arc::new(SnapshotIndex::empty()), DEFAULT_VIEW_LIMIT);
    assert_eq!(ex.list("/", Source::Build).unwrap_err().kind(), "not_in_snapshot");
}

#[test]
fn runtime_listing_order_and_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::create_dir(root.join("src")).unwrap();
    fs::create_dir(root.join("Build")).unwrap();
    fs::create_dir(root.join("hollow")).unwrap();
    fs::write(root.join("zz.rs"), b"fn main() {}").unwrap();
    fs::write(root.join("Cargo.TOML"), b"[package]").unwrap();
    fs::write(root.join(".env"), b"X=1").unwrap();

    let ex = explorer(APP);
    let base = root.display().to_string();
    let items = ex.list(&format!("{base}/"), Source::Runtime).unwrap();
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Build", "hollow", "src", ".env", "Cargo.TOML", "zz.rs"]);

    let env = &items[3];
    assert_eq!(env.ext, "");
    assert_eq!(items[4].ext, ".toml");
    assert_eq!(items[5].size, 12);
    assert!(items.iter().all(|i| i.modified_ms.is_some()));

    assert!(ex.list(&format!("{base}/hollow"), Source::Runtime).unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn runtime_listing_skips_dangling_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("real.txt"), b"x").unwrap();
    std::os::unix::fs::symlink(root.join("gone"), root.join("dangling")).unwrap();

    let ex = explorer(APP);
    let items = ex.list(&root.display().to_string(), Source::Runtime).unwrap();
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["real.txt"]);
}

#[test]
fn delete_then_list_hides_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("victim.log"), b"bye").unwrap();
    fs::write(root.join("keeper.log"), b"stay").unwrap();
    let base = root.display().to_string();

    let ex = explorer(APP);
    ex.delete(&format!("{base}/victim.log"), Source::Runtime).unwrap();

    let names: Vec<String> = ex
        .list(&base, Source::Runtime)
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["keeper.log".to_string()]);

    let again = ex.delete(&format!("{base}/victim.log"), Source::Runtime).unwrap_err();
    assert!(matches!(again, ConsoleError::NotFound(_)));
}

#[test]
fn deleting_a_directory_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::create_dir(root.join("keep")).unwrap();
    fs::write(root.join("keep/inner"), b"1").unwrap();

    let ex = explorer(APP);
    let err = ex
        .delete(&root.join("keep").display().to_string(), Source::Runtime)
        .unwrap_err();
    assert!(matches!(err, ConsoleError::IsADirectory(_)));
    assert!(root.join("keep/inner").exists());
}

#[test]
fn view_reports_binary_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("text.txt"), "héllo\n").unwrap();
    fs::write(root.join("image.bin"), [0x89, b'P', b'N', b'G', 0, 0, 0xff]).unwrap();

    let ex = Explorer::new(Arc::new(SnapshotIndex::empty()), 4);

    let text = ex.view(&root.join("text.txt").display().to_string(), Source::Runtime).unwrap();
    assert!(text.truncated);
    assert!(text.error.is_none());

    let bin = ex.view(&root.join("image.bin").display().to_string(), Source::Runtime).unwrap();
    assert!(bin.error.is_some());
    assert!(bin.content.starts_with('\u{fffd}'));
}

#[test]
fn binary_sniff_looks_past_a_small_view_limit() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let mut data = vec![b'a'; 900];
    data[700] = 0;
    fs::write(root.join("late_nul.dat"), &data).unwrap();

    let ex = Explorer::new(Arc::new(SnapshotIndex::empty()), 16);
    let view = ex.view(&root.join("late_nul.dat").display().to_string(), Source::Runtime).unwrap();
    assert_eq!(view.error.as_deref(), Some("binary file cannot be viewed as text"));
    assert_eq!(view.content.len(), 16);
    assert!(view.truncated);
}

#[test]
fn download_target_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("report.csv"), b"a,b\n1,2\n").unwrap();

    let ex = explorer(APP);
    let target = ex
        .download(&root.join("report.csv").display().to_string(), Source::Runtime)
        .unwrap();
    assert_eq!(target.file_name, "report.csv");
    assert_eq!(target.size, 8);

    let err = ex.download(&root.display().to_string(), Source::Runtime).unwrap_err();
    assert!(matches!(err, ConsoleError::IsADirectory(_)));
}
