mod backend;
mod cli;
mod client;
mod convert;
mod error;
mod fs_sink;
mod injector;
mod session;
mod target_memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use backend::QueuedBackend;
use cli::{Action, ConvertArgs, Opt, RecordArgs};
use fs_sink::FilesystemSink;
use injector::Injector;
use kael_format::Arch;
use kael_trace::Symbolizer;

fn main() {
    env_logger::init();

    let opt = Opt::parse();
    let result = match opt.action {
        Action::Record(args) => do_record(args),
        Action::Convert(args) => do_convert(args),
    };

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn do_record(args: RecordArgs) -> error::Result<()> {
    if args.inject {
        inject_into_target(args.pid)?;
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let base = args.output_dir.unwrap_or(exe_dir);
    let now = std::time::SystemTime::now();
    let session_dir = session::session_directory(&base, args.pid, now);
    std::fs::create_dir_all(&session_dir)?;
    let log_path = session::session_log_path(&session_dir);

    let session_timestamp = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let sink = FilesystemSink::create(&log_path, Arch::native(), args.pid, session_timestamp)?;

    let symbolizer = make_symbolizer(args.pid)?;
    let backend = Arc::new(QueuedBackend::spawn(symbolizer, sink));

    let walker = make_walker();
    let client = client::MonitorClient::attach(args.pid, walker, agent_module_name(), backend.clone())?;
    log::info!("attached to pid {}, writing to {}", args.pid, log_path.display());

    let stop_requested = Arc::new(AtomicBool::new(false));
    let ctrlc_flag = stop_requested.clone();
    ctrlc::set_handler(move || {
        ctrlc_flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to install Ctrl-C handler");

    client.run_mainloop(|| stop_requested.load(Ordering::SeqCst));

    match Arc::try_unwrap(backend) {
        Ok(backend) => backend.join(),
        Err(_) => log::warn!("backend still referenced at shutdown, skipping final drain"),
    }

    Ok(())
}

fn do_convert(args: ConvertArgs) -> error::Result<()> {
    if args.csv.is_none() && args.sqlite.is_none() {
        return Err(error::MonitorError::NoOutputFormat);
    }

    let report = convert::build_report(&args.input)?;

    if let Some(csv_path) = &args.csv {
        let stackentry_path = csv_path.with_file_name(format!(
            "{}_stackentry.csv",
            csv_path.file_stem().and_then(|s| s.to_str()).unwrap_or("report")
        ));
        convert::write_csv(&report, csv_path, &stackentry_path)?;
        log::info!("wrote {} and {}", csv_path.display(), stackentry_path.display());
    }

    if let Some(sqlite_path) = &args.sqlite {
        convert::write_sqlite(&report, sqlite_path)?;
        log::info!("wrote {}", sqlite_path.display());
    }

    Ok(())
}

#[cfg(windows)]
fn inject_into_target(pid: u32) -> error::Result<()> {
    let injector = injector::RemoteThreadInjector;
    injector.inject(pid, &agent_library_path())
}

#[cfg(not(windows))]
fn inject_into_target(_pid: u32) -> error::Result<()> {
    Err(error::MonitorError::InjectFailed)
}

fn agent_library_path() -> String {
    #[cfg(target_pointer_width = "64")]
    return "kael_agent.x64.dll".to_string();
    #[cfg(target_pointer_width = "32")]
    return "kael_agent.x86.dll".to_string();
}

fn agent_module_name() -> String {
    agent_library_path()
}

#[cfg(windows)]
fn make_walker() -> kael_trace::WinStackWalker {
    kael_trace::WinStackWalker::new()
}

#[cfg(not(windows))]
fn make_walker() -> kael_trace::NullStackWalker {
    kael_trace::NullStackWalker::new()
}

#[cfg(windows)]
fn make_symbolizer(pid: u32) -> error::Result<kael_trace::DbgHelpSymbolizer> {
    let target = kael_trace::TargetHandle::open(pid).map_err(|_| error::MonitorError::TargetUnavailable)?;
    let mut symbolizer = kael_trace::DbgHelpSymbolizer::new();
    symbolizer.init(&target)?;
    Ok(symbolizer)
}

#[cfg(not(windows))]
fn make_symbolizer(_pid: u32) -> error::Result<kael_trace::NullSymbolizer> {
    Ok(kael_trace::NullSymbolizer::new())
}
