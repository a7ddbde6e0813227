use cauldron::{
    diagnostics::{
        report_compile_error, report_io_error, report_runtime_error, report_synth_error,
        report_syntax_error,
    },
    language::{
        ast::Fragment,
        compiler::Unit,
        template::{Binding, Bindings, HoleKind, Template},
        types::TypeRef,
    },
    project::{
        graph::module_name,
        manifest::{find_manifest, Manifest},
        session::{Session, SessionError},
    },
    reload::{FileWatcher, HotReloader},
    runtime::value::Value,
};
use clap::{Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
    process,
    time::Duration,
};

#[derive(Parser)]
#[command(name = "cauldron", version, about = "Hot-reloading module runner with synthesized containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a module and call one of its zero-argument functions
    Run {
        file: PathBuf,
        #[arg(long, default_value = "main")]
        entry: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Compile a module and report diagnostics
    Check {
        file: PathBuf,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Run the hot module's `update` every frame, reloading it on change
    Watch {
        file: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Instantiate a template file and print the resulting fragment
    Expand {
        template: PathBuf,
        /// `hole=kind:value`, e.g. `w=ident:point` or `T=type:(ptr u8)`
        #[arg(long = "bind")]
        bindings: Vec<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            file,
            entry,
            manifest,
        } => run(&file, &entry, manifest.as_deref()),
        Command::Check { file, manifest } => check(&file, manifest.as_deref()),
        Command::Watch {
            file,
            manifest,
            frames,
        } => watch(file, manifest.as_deref(), frames),
        Command::Expand {
            template,
            bindings,
        } => expand(&template, &bindings),
    };
    process::exit(code);
}

/// Explicit manifest, or the nearest `cauldron.toml` above `near`.
fn resolve_manifest(explicit: Option<&Path>, near: &Path) -> Result<Option<Manifest>, i32> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_manifest(near),
    };
    let Some(path) = path else {
        return Ok(None);
    };
    match Manifest::load(&path) {
        Ok(manifest) => {
            log::info!("using manifest {}", manifest.path.display());
            Ok(Some(manifest))
        }
        Err(err) => {
            eprintln!("{err}");
            Err(1)
        }
    }
}

fn prepare_session(explicit: Option<&Path>, near: &Path) -> Result<Session, i32> {
    match resolve_manifest(explicit, near)? {
        Some(manifest) => Session::prepare(&manifest).map_err(|err| {
            match err {
                SessionError::Synth(err) => report_synth_error(err),
                other => eprintln!("{other}"),
            }
            1
        }),
        None => Ok(Session::standalone(
            cauldron::language::compiler::DEFAULT_HEAP_LIMIT,
        )),
    }
}

fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn run(file: &Path, entry: &str, manifest: Option<&Path>) -> i32 {
    let mut session = match prepare_session(manifest, &parent_dir(file)) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let Some(module) = session.loader.load_module(file, &session.deps) else {
        return 1;
    };
    let Some(handle) = module.function(entry) else {
        eprintln!("`{}` has no function named `{entry}`", module.name());
        return 1;
    };
    if handle.arity() != 0 {
        eprintln!("`{entry}` takes {} arguments; only zero-argument functions can be run", handle.arity());
        return 1;
    }
    match session.loader.compiler_mut().call(&handle, Vec::new()) {
        Ok(Value::Unit) => 0,
        Ok(value) => {
            println!("{value}");
            0
        }
        Err(err) => {
            report_runtime_error(&err);
            1
        }
    }
}

fn check(file: &Path, manifest: Option<&Path>) -> i32 {
    let mut session = match prepare_session(manifest, &parent_dir(file)) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) => {
            report_io_error(file, &err);
            return 1;
        }
    };
    let deps = session.deps.clone();
    match session
        .loader
        .compiler_mut()
        .compile(Unit::file(module_name(file), file, text), &deps)
    {
        Ok(module) => {
            println!(
                "{}: ok ({} functions)",
                file.display(),
                module.function_names().count()
            );
            0
        }
        Err(err) => {
            report_compile_error(file, err);
            1
        }
    }
}

fn watch(file: Option<PathBuf>, manifest: Option<&Path>, frames: Option<u64>) -> i32 {
    let near = match &file {
        Some(file) => parent_dir(file),
        None => PathBuf::from("."),
    };
    let session = match prepare_session(manifest, &near) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let Some(hot) = file.or_else(|| session.hot.path.clone()) else {
        eprintln!("no hot module given: pass a file or set `[hot] path` in cauldron.toml");
        return 1;
    };

    let mut watcher = match FileWatcher::new(Duration::from_millis(session.hot.poll_interval_ms)) {
        Ok(watcher) => watcher,
        Err(err) => {
            eprintln!("failed to start the file watcher: {err}");
            return 1;
        }
    };
    if let Err(err) = watcher.watch_file(&hot) {
        eprintln!("failed to watch {}: {err}", hot.display());
        return 1;
    }

    let frame = Duration::from_millis(session.hot.frame_ms);
    log::info!("watching {} at {}ms per frame", hot.display(), session.hot.frame_ms);
    let mut reloader = HotReloader::new(session.loader, session.deps, hot, watcher, frame);
    reloader.run(frames);
    reloader.shutdown();
    log::info!(
        "stopped after {}ms and {} reloads",
        reloader.timer().millis_elapsed(),
        reloader.reload_count()
    );
    0
}

fn parse_binding(template: &Template, raw: &str) -> Result<(String, Binding), String> {
    let (hole, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("binding `{raw}` is not of the form hole=kind:value"))?;
    let (kind, value) = rest
        .split_once(':')
        .ok_or_else(|| format!("binding `{raw}` is missing its kind"))?;
    let kind = HoleKind::parse(kind).ok_or_else(|| format!("unknown hole kind `{kind}`"))?;
    if template.hole_kind(hole).is_none() {
        log::warn!("`{hole}` is not declared by template `{}`", template.name());
    }
    let binding = match kind {
        HoleKind::Ident => Binding::ident(value),
        HoleKind::Type => Binding::Type(TypeRef::parse(value).map_err(|err| err.describe(value))?),
        HoleKind::Fragment => {
            Binding::Fragment(Fragment::parse_expr(hole, value).map_err(|err| err.describe(value))?)
        }
    };
    Ok((hole.to_string(), binding))
}

fn expand(path: &Path, args: &[String]) -> i32 {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            report_io_error(path, &err);
            return 1;
        }
    };
    let name = module_name(path);
    let template = match Template::parse(&name, &text) {
        Ok(template) => template,
        Err(err) => {
            report_syntax_error(&path.display().to_string(), &text, err);
            return 1;
        }
    };
    let mut bindings = Bindings::new();
    for arg in args {
        match parse_binding(&template, arg) {
            Ok((hole, binding)) => bindings.insert(hole, binding),
            Err(message) => {
                eprintln!("{message}");
                return 1;
            }
        }
    }
    match template.instantiate(&bindings) {
        Ok(fragment) => {
            println!("{fragment}");
            0
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}
