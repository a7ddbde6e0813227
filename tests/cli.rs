use std::{
    fs,
    path::Path,
    process::{Command, Output, Stdio},
};
use tempfile::tempdir;

fn cauldron(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cauldron"))
        .current_dir(dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run cauldron")
}

#[test]
fn run_prints_the_entry_value() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("calc.cld"),
        "(fun square ((x i64)) i64 (* x x))\n(fun main () i64 (square 7))\n",
    )
    .expect("write");
    let output = cauldron(dir.path(), &["run", "calc.cld"]);
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "49");
}

#[test]
fn run_uses_arrays_from_the_manifest() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("cauldron.toml"),
        "[[arrays]]\nelem = \"i64\"\n",
    )
    .expect("write manifest");
    fs::write(
        dir.path().join("sum.cld"),
        r#"
(fun main () i64
  (let items (array_i64_new (seq i64 4 5 6)))
  (let total (+ (array_i64_index items 0) (array_i64_index items 2)))
  (array_i64_release items)
  total)
"#,
    )
    .expect("write");
    let output = cauldron(dir.path(), &["run", "sum.cld"]);
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "10");
}

#[test]
fn check_reports_compile_errors() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("broken.cld"), "(fun f () i64 (g))\n").expect("write");
    let output = cauldron(dir.path(), &["check", "broken.cld"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown function `g`"), "stderr: {stderr}");
    assert!(stderr.contains("broken.cld"), "stderr: {stderr}");
}

#[test]
fn negative_malloc_aborts_at_the_heap_limit() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("greedy.cld"),
        "(fun main () unit (free (malloc (- 0 1))))\n",
    )
    .expect("write");
    let output = cauldron(dir.path(), &["run", "greedy.cld"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("heap limit"), "stderr: {stderr}");
}

#[test]
fn watch_runs_a_bounded_number_of_frames() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("game.cld"),
        "(fun update () unit ())\n(fun terminate () unit (print \"bye\"))\n",
    )
    .expect("write");
    let output = cauldron(dir.path(), &["watch", "game.cld", "--frames", "2"]);
    assert!(
        output.status.success(),
        "watch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("bye"));
}

#[test]
fn expand_prints_the_instantiated_fragment() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("getter.cld"),
        "(template ((name ident) (T type)) (fun ${name}_get ((p (ptr $T))) $T (load p)))",
    )
    .expect("write");
    let output = cauldron(
        dir.path(),
        &[
            "expand",
            "getter.cld",
            "--bind",
            "name=ident:pos",
            "--bind",
            "T=type:i64",
        ],
    );
    assert!(
        output.status.success(),
        "expand failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pos_get"));
    assert!(stdout.contains("(ptr i64)"));
}
