use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::IntoDiagnostic;
use nix::unistd::Pid;

use remora_analyzer::{
    Analyzer, CapstoneDecoder, FunctionKind, MemoryImage, SpecifiedFunctions,
};
use remora_debugger::{
    Controller, DebugEvent, Error, Region, ResumeDisposition, TerminationStatus,
};

use crate::{ElfImage, SessionConfig};

/// Runs the subcommand for spawning and driving a debuggee.
pub fn evaluate_run(
    config: Option<String>,
    program: PathBuf,
    args: Vec<String>,
    analyze: bool,
) -> miette::Result<i32> {
    let config = parse_session_config(config)?;

    tracing::debug!(
        wait_timeout_ms = config.wait_timeout_ms,
        analyze,
        "session configured"
    );

    let mut controller = Controller::new();

    let pid = controller
        .open(
            &program,
            None,
            &args,
            config.tty.as_deref().map(Path::new),
        )
        .into_diagnostic()?;

    println!("spawned {} as pid {pid}", program.display());

    if analyze {
        analyze_executable_region(&controller, &program, &config)?;
    }

    controller
        .resume(ResumeDisposition::Continue)
        .into_diagnostic()?;

    let timeout = Duration::from_millis(config.wait_timeout_ms);

    loop {
        match controller.wait_event(timeout) {
            Ok(DebugEvent::Trap { tid, .. }) => {
                println!("trace trap on thread {tid}");
                controller
                    .resume(ResumeDisposition::Continue)
                    .into_diagnostic()?;
            }
            Ok(DebugEvent::Stopped { signal, tid, .. }) => {
                println!("thread {tid} stopped on signal {signal}");
                controller
                    .resume(ResumeDisposition::PassSignal)
                    .into_diagnostic()?;
            }
            Ok(DebugEvent::Syscall { tid, .. }) => {
                println!("thread {tid} at syscall boundary");
                controller
                    .resume(ResumeDisposition::Continue)
                    .into_diagnostic()?;
            }
            Ok(DebugEvent::Terminated { status, pid }) => match status {
                TerminationStatus::Exited { code } => {
                    println!("pid {pid} exited with code {code}");
                    return Ok(code);
                }
                TerminationStatus::Signaled { signal } => {
                    println!("pid {pid} killed by signal {signal}");
                    return Ok(128 + signal);
                }
            },
            Err(Error::Timeout) => continue,
            Err(e) => return Err(e).into_diagnostic(),
        }
    }
}

/// Runs the subcommand for attaching to a running process.
pub fn evaluate_attach(config: Option<String>, pid: i32) -> miette::Result<()> {
    let config = parse_session_config(config)?;

    let mut controller = Controller::new();
    let pid = Pid::from_raw(pid);

    controller.attach(pid).into_diagnostic()?;

    // The attach stop is the first reported event.
    let event = controller
        .wait_event(Duration::from_millis(config.wait_timeout_ms.max(2000)))
        .into_diagnostic()?;

    println!("attached to {pid}: first event {event:?}");

    let state = controller.get_state().into_diagnostic()?;
    println!(
        "ip={:#x} sp={:#x}",
        state.instruction_pointer(),
        state.stack_pointer()
    );

    let regions = controller.memory_regions().into_diagnostic()?;
    println!("{} mapped regions", regions.len());

    controller.detach().into_diagnostic()?;
    println!("detached");

    Ok(())
}

/// Runs the subcommand for analyzing a region of a running process.
pub fn evaluate_analyze(config: Option<String>, pid: i32, addr: u64) -> miette::Result<()> {
    let config = parse_session_config(config)?;

    let mut controller = Controller::new();
    let pid = Pid::from_raw(pid);

    controller.attach(pid).into_diagnostic()?;

    // Wait out the attach stop so the analysis runs over quiescent
    // memory; if it has not landed yet the result is merely fuzzy.
    match controller.wait_event(Duration::from_millis(config.wait_timeout_ms.max(2000))) {
        Ok(_) | Err(Error::Timeout) => (),
        Err(e) => return Err(e).into_diagnostic(),
    }

    let regions = controller.memory_regions().into_diagnostic()?;

    let Some(region) = regions.iter().find(|r| r.contains(addr)).cloned() else {
        controller.detach().into_diagnostic()?;
        println!("no mapped region contains {addr:#x}");
        return Ok(());
    };

    let mut analyzer = Analyzer::new(Box::new(
        CapstoneDecoder::new_host().into_diagnostic()?,
    ))
    .with_max_passes(config.max_walk_passes);

    // The backing file, when there is one, provides symbols and the
    // entry point.
    if !region.name.is_empty() && Path::new(&region.name).is_file() {
        let module_base = regions
            .iter()
            .filter(|r| r.name == region.name)
            .map(|r| r.start)
            .min()
            .unwrap_or(region.start);

        let symbols = ElfImage::load(Path::new(&region.name))?.with_slide(module_base);
        let binary_info = ElfImage::load(Path::new(&region.name))?.with_slide(module_base);

        analyzer = analyzer
            .with_symbols(Box::new(symbols))
            .with_binary_info(Box::new(binary_info));
    }

    if let Some(path) = config.specified_functions.as_deref() {
        let specified = SpecifiedFunctions::load(Path::new(path)).into_diagnostic()?;
        analyzer = analyzer.with_specified_functions(specified);
    }

    analyzer
        .analyze(&controller as &dyn MemoryImage, &region)
        .into_diagnostic()?;

    if let Some(analysis) = analyzer.analysis(&region) {
        print_function_map(&region, analysis);
    }

    controller.detach().into_diagnostic()?;

    Ok(())
}

/// Runs the subcommand for listing host processes.
pub fn evaluate_ps() -> miette::Result<()> {
    let controller = Controller::new();

    let records = controller.enumerate_processes().into_diagnostic()?;

    println!("{:>8} {:>8} {:>8} NAME", "PID", "PPID", "UID");

    for record in records {
        println!(
            "{:>8} {:>8} {:>8} {}",
            record.pid, record.ppid, record.uid, record.name
        );
    }

    Ok(())
}

/// Analyzes the debuggee's main executable region and prints the
/// recovered function map.
fn analyze_executable_region(
    controller: &Controller,
    program: &Path,
    config: &SessionConfig,
) -> miette::Result<()> {
    let program_name = program.file_name().and_then(OsStr::to_str).unwrap_or("");

    let regions = controller.memory_regions().into_diagnostic()?;

    let module_base = regions
        .iter()
        .filter(|r| Path::new(&r.name).file_name() == Some(OsStr::new(program_name)))
        .map(|r| r.start)
        .min();

    let Some(region) = regions
        .iter()
        .find(|r| {
            r.permissions.execute
                && Path::new(&r.name).file_name() == Some(OsStr::new(program_name))
        })
        .cloned()
    else {
        println!("no executable region found for {program_name}");
        return Ok(());
    };

    let module_base = module_base.unwrap_or(0);

    // One instance per collaborator seam; the file is small and read
    // locally.
    let symbols = ElfImage::load(program)?.with_slide(module_base);
    let binary_info = ElfImage::load(program)?.with_slide(module_base);

    let mut analyzer = Analyzer::new(Box::new(
        CapstoneDecoder::new_host().into_diagnostic()?,
    ))
    .with_binary_info(Box::new(binary_info))
    .with_symbols(Box::new(symbols))
    .with_max_passes(config.max_walk_passes);

    if let Some(path) = config.specified_functions.as_deref() {
        let specified = SpecifiedFunctions::load(Path::new(path)).into_diagnostic()?;
        analyzer = analyzer.with_specified_functions(specified);
    }

    analyzer
        .analyze(controller as &dyn MemoryImage, &region)
        .into_diagnostic()?;

    if let Some(analysis) = analyzer.analysis(&region) {
        print_function_map(&region, analysis);
    }

    Ok(())
}

fn print_function_map(region: &Region, analysis: &remora_analyzer::RegionAnalysis) {
    println!(
        "region {:#x}-{:#x} ({}): {} functions{}",
        region.start,
        region.end,
        region.name,
        analysis.functions.len(),
        if analysis.fuzzy { " (fuzzy)" } else { "" },
    );

    for function in analysis.functions.values() {
        let kind = match function.kind {
            FunctionKind::Standard => "standard",
            FunctionKind::Thunk => "thunk",
            FunctionKind::Unknown => "unknown",
        };

        println!(
            "  {:#x}-{:#x} {:>8} refs={}",
            function.entry, function.end, kind, function.references
        );
    }
}

fn parse_session_config(config: Option<String>) -> miette::Result<SessionConfig> {
    let Some(config) = config else {
        return Ok(SessionConfig::default());
    };

    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}
