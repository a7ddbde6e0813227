use crate::{
    language::{
        compiler::{Compiler, Module},
        types::TypeRef,
    },
    project::graph::ModuleLoader,
    reload::{HotReloader, SlotState},
    runtime::value::Value,
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::{Duration, Instant},
};
use tempfile::{tempdir, TempDir};

const COUNTER_V1: &str = r#"
(global ticks i64 0)
(fun update () unit (set ticks (+ ticks 1)))
(fun terminate () unit (print "v1 done"))
"#;

const COUNTER_V2: &str = r#"
(global ticks i64 100)
(fun update () unit (set ticks (+ ticks 10)))
"#;

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    tx: Sender<PathBuf>,
    reloader: HotReloader<Receiver<PathBuf>>,
}

impl Fixture {
    fn new(source: &str) -> Self {
        Self::with_loader(source, ModuleLoader::new(Compiler::new()), Vec::new())
    }

    fn with_loader(source: &str, loader: ModuleLoader, deps: Vec<Module>) -> Self {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("game.cld");
        fs::write(&path, source).expect("write hot module");
        let (tx, rx) = mpsc::channel();
        let reloader = HotReloader::new(loader, deps, &path, rx, Duration::from_millis(1));
        Self {
            _dir: dir,
            path,
            tx,
            reloader,
        }
    }

    fn edit(&self, source: &str) {
        fs::write(&self.path, source).expect("rewrite hot module");
        self.tx.send(self.path.clone()).expect("notify");
    }

    fn global(&self, name: &str) -> Option<Value> {
        self.reloader.current().and_then(|module| module.global(name))
    }

    fn live_blocks(&self) -> usize {
        self.reloader.loader().compiler().heap().live_blocks()
    }
}

fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).expect("write module");
    path
}

#[test]
fn update_runs_every_frame_and_reload_swaps_it() {
    let mut fixture = Fixture::new(COUNTER_V1);
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert!(fixture.reloader.update().is_bound());
    assert!(fixture.reloader.terminate().is_bound());

    fixture.reloader.run_frame();
    fixture.reloader.run_frame();
    assert_eq!(fixture.global("ticks"), Some(Value::Int(2)));
    let old = fixture.reloader.current().expect("module").id();

    fixture.edit(COUNTER_V2);
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 1);
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert_eq!(fixture.global("ticks"), Some(Value::Int(110)));
    assert!(!fixture.reloader.terminate().is_bound());
    assert!(!fixture.reloader.loader().graph().contains(old));
    assert_eq!(fixture.reloader.loader().graph().len(), 1);
}

#[test]
fn several_notifications_cause_a_single_reload() {
    let mut fixture = Fixture::new(COUNTER_V1);
    fixture.edit(COUNTER_V2);
    fixture.tx.send(fixture.path.clone()).expect("notify");
    fixture.tx.send(fixture.path.clone()).expect("notify");
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 1);
}

#[test]
fn failed_reload_keeps_the_old_module_running() {
    let mut fixture = Fixture::new(COUNTER_V1);
    fixture.reloader.run_frame();
    let old = fixture.reloader.current().expect("module").id();

    fixture.edit("(fun update () unit (nope))");
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 0);
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert_eq!(fixture.reloader.current().expect("module").id(), old);
    assert_eq!(fixture.global("ticks"), Some(Value::Int(2)));
    assert_eq!(fixture.reloader.loader().graph().len(), 1);

    fixture.edit(COUNTER_V2);
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 1);
    assert_eq!(fixture.global("ticks"), Some(Value::Int(110)));
}

#[test]
fn missing_entry_points_are_no_ops() {
    let mut fixture = Fixture::new("(fun helper () i64 1)");
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert!(!fixture.reloader.update().is_bound());
    assert!(!fixture.reloader.terminate().is_bound());
    fixture.reloader.run(Some(3));
    fixture.reloader.shutdown();
    assert_eq!(fixture.reloader.state(), SlotState::Unloaded);
    assert!(fixture.reloader.loader().graph().is_empty());
}

#[test]
fn entry_points_with_parameters_are_not_bound() {
    let fixture = Fixture::new("(fun update ((dt i64)) unit ())");
    assert!(!fixture.reloader.update().is_bound());
}

#[test]
fn failed_initial_compile_waits_for_a_fix() {
    let mut fixture = Fixture::new("(fun update () unit");
    assert_eq!(fixture.reloader.state(), SlotState::Unloaded);
    assert!(fixture.reloader.current().is_none());
    fixture.reloader.run_frame();

    fixture.edit(COUNTER_V1);
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert_eq!(fixture.global("ticks"), Some(Value::Int(1)));
}

#[test]
fn failing_update_is_disabled_until_the_next_reload() {
    let mut fixture = Fixture::new(r#"(fun update () unit (panic "boom"))"#);
    fixture.reloader.run_frame();
    assert!(!fixture.reloader.update().is_bound());
    fixture.reloader.run_frame();

    fixture.edit(COUNTER_V1);
    fixture.reloader.run_frame();
    assert!(fixture.reloader.update().is_bound());
    assert_eq!(fixture.global("ticks"), Some(Value::Int(1)));
}

#[test]
fn recursing_update_is_disabled_without_crashing() {
    let mut fixture = Fixture::new(
        r#"
(fun spin ((n i64)) i64 (+ 1 (spin (+ n 1))))
(fun update () unit (spin 0))
"#,
    );
    fixture.reloader.run_frame();
    assert!(!fixture.reloader.update().is_bound());

    fixture.edit(COUNTER_V1);
    fixture.reloader.run_frame();
    assert!(fixture.reloader.update().is_bound());
    assert_eq!(fixture.global("ticks"), Some(Value::Int(1)));
}

#[test]
fn change_marks_the_slot_stale_before_reloading() {
    let mut fixture = Fixture::new(COUNTER_V1);
    fixture.edit(COUNTER_V2);
    assert!(fixture.reloader.poll_changes());
    assert_eq!(fixture.reloader.state(), SlotState::Stale);
    assert!(fixture.reloader.reload());
    assert_eq!(fixture.reloader.state(), SlotState::Loaded);
    assert!(!fixture.reloader.poll_changes());
}

#[test]
fn timer_keeps_running_across_reloads() {
    let mut fixture = Fixture::new(COUNTER_V1);
    let before = fixture.reloader.timer().millis_elapsed();
    thread::sleep(Duration::from_millis(5));
    fixture.edit(COUNTER_V2);
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 1);
    assert!(fixture.reloader.timer().millis_elapsed() >= before + 5);
}

#[test]
fn terminate_releases_buffers_of_the_old_version() {
    let mut compiler = Compiler::new();
    let element = TypeRef::parse("i64").expect("type");
    let ops = compiler.declare_array(&element).expect("declare array");
    let rc = ops.dependencies()[0].clone();
    let mut loader = ModuleLoader::new(compiler);
    loader.adopt(rc.clone());
    loader.adopt(ops.clone());

    let source = r#"
        (global buffer array_i64 (array_i64_new (seq i64 1 2 3)))
        (global sum i64 0)
        (fun update () unit
          (set sum (+ (array_i64_index buffer 0) (array_i64_index buffer 2))))
        (fun terminate () unit (array_i64_release buffer))
    "#;
    let mut fixture = Fixture::with_loader(source, loader, vec![ops.clone(), rc]);
    assert_eq!(fixture.live_blocks(), 1);
    fixture.reloader.run_frame();
    assert_eq!(fixture.global("sum"), Some(Value::Int(4)));

    fixture.edit(source);
    fixture.reloader.run_frame();
    assert_eq!(fixture.reloader.reload_count(), 1);
    assert_eq!(fixture.live_blocks(), 1);
    assert_eq!(ops.global("array_i64_cached_offset"), Some(Value::Int(16)));

    fixture.reloader.shutdown();
    assert_eq!(fixture.live_blocks(), 0);
    assert_eq!(fixture.reloader.loader().graph().len(), 2);
}

#[test]
fn reload_unloads_modules_built_on_the_old_version() {
    let mut fixture = Fixture::new("(fun base_value () i64 7)");
    let hot = fixture.reloader.current().expect("module").clone();
    let dir = fixture.path.parent().expect("dir").to_path_buf();
    let helper = write(&dir, "helper.cld", "(fun doubled () i64 (* (base_value) 2))");
    let helper = fixture
        .reloader
        .loader_mut()
        .load_module(&helper, &[hot])
        .expect("helper");

    fixture.edit("(fun base_value () i64 8)");
    fixture.reloader.run_frame();
    assert!(!fixture.reloader.loader().graph().contains(helper.id()));
    assert_eq!(fixture.reloader.loader().graph().len(), 1);
}

#[test]
fn run_keeps_the_frame_cadence() {
    let dir = tempdir().expect("tempdir");
    let path = write(dir.path(), "game.cld", COUNTER_V1);
    let (_tx, rx) = mpsc::channel::<PathBuf>();
    let mut reloader = HotReloader::new(
        ModuleLoader::new(Compiler::new()),
        Vec::new(),
        &path,
        rx,
        Duration::from_millis(10),
    );
    let started = Instant::now();
    reloader.run(Some(3));
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(
        reloader.current().and_then(|module| module.global("ticks")),
        Some(Value::Int(3))
    );
}
