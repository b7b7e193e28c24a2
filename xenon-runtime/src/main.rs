use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};
use xenon_config::{CliOverrides, RuntimeConfig};
use xenon_core::WaitTimeout;
use xenon_kernel::{dispatch, GuestThread, ImportCall, KernelContext};
use xenon_memory::GuestMemory;
use xenon_vfs::{crypto, open_archive, VfsResolver};

/// The single translated-code consumer this repository models: it stands
/// in for generated recompilation output, boots the kernel stack, and
/// runs one illustrative guest entry function through the import ABI.
#[derive(Parser, Debug)]
#[command(name = "xenon-runtime", about = "Static-recompilation runtime boot harness")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "xenon.toml", value_name = "PATH")]
    config: PathBuf,

    /// Overrides the guest address space size, in bytes.
    #[arg(long, value_name = "BYTES")]
    guest_address_space_size: Option<usize>,

    /// Overrides the per-thread TLS slot count.
    #[arg(long, value_name = "N")]
    tls_slot_count: Option<usize>,

    /// Replaces the configured mod overlay directories, highest priority first.
    #[arg(long = "overlay-dir", value_name = "PATH")]
    overlay_dirs: Vec<String>,

    /// Overrides the update directory.
    #[arg(long, value_name = "PATH")]
    update_dir: Option<String>,

    /// Overrides the installed game directory.
    #[arg(long, value_name = "PATH")]
    game_dir: Option<String>,

    /// Overrides the archive AES decryption key path.
    #[arg(long, value_name = "PATH")]
    decryption_key_path: Option<String>,

    /// Overrides the soft cap, in bytes, on cached extracted archive bytes.
    #[arg(long, value_name = "BYTES")]
    max_cached_extracted_bytes: Option<u64>,

    /// Overrides the tracing level filter.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Overrides the tracing output format (text, json, pretty).
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    /// Forces file logging on even if the config file disables it.
    #[arg(long)]
    log_to_file: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            guest_address_space_size: self.guest_address_space_size,
            tls_slot_count: self.tls_slot_count,
            overlay_dirs: self.overlay_dirs.clone(),
            update_dir: self.update_dir.clone(),
            game_dir: self.game_dir.clone(),
            decryption_key_path: self.decryption_key_path.clone(),
            max_cached_extracted_bytes: self.max_cached_extracted_bytes,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            log_to_file: self.log_to_file,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RuntimeConfig::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_overrides(&cli.overrides());

    let _log_guard = init_tracing(&config.logging)?;

    info!(
        guest_address_space_size = config.guest_address_space_size(),
        tls_slot_count = config.tls_slot_count(),
        "starting xenon-runtime"
    );

    let memory = Arc::new(GuestMemory::reserve().context("reserving guest address space")?);

    let key = match &config.archive.decryption_key_path {
        Some(path) => Some(crypto::load_key(Path::new(path)).with_context(|| format!("loading decryption key {path}"))?),
        None => None,
    };
    let max_cached_bytes = config.archive.max_cached_extracted_bytes.unwrap_or(64 * 1024 * 1024);

    let overlay_dirs: Vec<PathBuf> = config.vfs.overlay_dirs.iter().map(PathBuf::from).collect();
    let update_dir = config.vfs.update_dir.as_ref().map(PathBuf::from);
    let game_dir = config.vfs.game_dir.as_ref().map(PathBuf::from);
    let resolver = Arc::new(VfsResolver::new(overlay_dirs, update_dir.clone(), game_dir.clone()));

    for dir in [&update_dir, &game_dir].into_iter().flatten() {
        for archive_path in find_archives(dir)? {
            match open_archive(&archive_path, key.as_ref(), max_cached_bytes) {
                Ok(archive) => {
                    info!(path = %archive_path.display(), "loaded archive");
                    resolver.add_archive(archive);
                }
                Err(err) => warn!(path = %archive_path.display(), error = %err, "failed to open archive, skipping"),
            }
        }
    }

    let ctx = Arc::new(KernelContext::with_vfs(Arc::clone(&memory), Arc::clone(&resolver)));

    let thread = spawn_entry_thread(Arc::clone(&memory), ctx)?;

    let result = thread.wait_exit(WaitTimeout::Infinite, xenon_kernel::current_thread_id());
    info!(?result, exit_code = thread.exit_code(), "entry guest thread finished");

    std::process::exit(thread.exit_code() as i32);
}

/// Spawns the one illustrative guest entry function this repository models
/// in lieu of generated recompilation output: it creates a kernel event,
/// signals it, waits on it through the ordinary dispatch path, and closes
/// the handle, proving the import ABI and sync primitives work end to end.
fn spawn_entry_thread(memory: Arc<GuestMemory>, ctx: Arc<KernelContext>) -> Result<Arc<GuestThread>> {
    let entry_addr = memory.alloc(4, 4).context("allocating entry scratch memory")?;
    let handle_slot = memory.alloc(4, 4).context("allocating handle scratch memory")?;

    let entry: xenon_kernel::EntryFn = Box::new(move |context| {
        let mut call = ImportCall::new(context, xenon_kernel::current_thread_id());

        call.context.gpr[3] = handle_slot as u64;
        call.context.gpr[4] = 0;
        call.context.gpr[5] = 0;
        if let Err(err) = dispatch("NtCreateEvent", &mut call, &ctx) {
            warn!(error = %err, "entry: NtCreateEvent failed");
            call.context.gpr[3] = 1;
            return;
        }

        let handle = ctx.memory.read_u32(handle_slot);

        call.context.gpr[3] = handle as u64;
        if let Err(err) = dispatch("KeSetEvent", &mut call, &ctx) {
            warn!(error = %err, "entry: KeSetEvent failed");
        }

        call.context.gpr[3] = handle as u64;
        call.context.gpr[4] = 0;
        if let Err(err) = dispatch("NtWaitForSingleObjectEx", &mut call, &ctx) {
            warn!(error = %err, "entry: NtWaitForSingleObjectEx failed");
        }

        call.context.gpr[3] = handle as u64;
        if let Err(err) = dispatch("NtClose", &mut call, &ctx) {
            warn!(error = %err, "entry: NtClose failed");
        }

        call.context.gpr[3] = 0;
    });

    GuestThread::spawn(0, memory, entry_addr, 0x1_0000, 0, entry).context("spawning entry guest thread")
}

fn find_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))? {
        let entry = entry.with_context(|| format!("reading directory {}", dir.display()))?;
        let path = entry.path();
        let is_archive = matches!(
            path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref(),
            Some("img") | Some("rpf")
        );
        if path.is_file() && is_archive {
            found.push(path);
        }
    }
    Ok(found)
}

fn init_tracing(logging: &xenon_config::LoggingSection) -> Result<Option<WorkerGuard>> {
    let level = logging.level.as_deref().unwrap_or("info");
    let filter_spec = format!("{level},xenon={level}");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_spec));

    let mut guard = None;
    let file_writer = if logging.file_enabled {
        let path = logging.file_path.as_deref().unwrap_or("logs");
        let (writer, file_guard) = create_file_writer(path)?;
        guard = Some(file_guard);
        Some(writer)
    } else {
        None
    };

    let has_file = file_writer.is_some();
    let console_enabled = Arc::new(AtomicBool::new(logging.console_output));
    let console_writer = ConsoleToggleWriter::new(Arc::clone(&console_enabled));
    let writer: BoxMakeWriter = match file_writer {
        Some(file) => BoxMakeWriter::new(console_writer.and(file)),
        None => BoxMakeWriter::new(console_writer),
    };

    let builder = fmt().with_env_filter(env_filter).with_writer(writer).with_ansi(logging.console_output && !has_file);

    match logging.format.as_deref().unwrap_or("text").to_ascii_lowercase().as_str() {
        "json" => {
            let _ = builder.json().try_init();
        }
        "pretty" => {
            let _ = builder.pretty().try_init();
        }
        _ => {
            let _ = builder.try_init();
        }
    }
    Ok(guard)
}

fn create_file_writer(path: &str) -> Result<(non_blocking::NonBlocking, WorkerGuard)> {
    let provided = Path::new(path);
    let file_path = if provided.is_file() || provided.extension().is_some() {
        provided.to_path_buf()
    } else {
        fs::create_dir_all(provided).with_context(|| format!("creating log directory {}", provided.display()))?;
        provided.join("xenon-runtime.log")
    };
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating log directory {}", parent.display()))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
        .with_context(|| format!("opening log file {}", file_path.display()))?;
    Ok(non_blocking(file))
}

#[derive(Clone)]
struct ConsoleToggleWriter {
    enabled: Arc<AtomicBool>,
}

impl ConsoleToggleWriter {
    fn new(enabled: Arc<AtomicBool>) -> Self {
        Self { enabled }
    }
}

struct ConditionalConsoleWriter {
    enabled: Arc<AtomicBool>,
    stderr: io::Stderr,
}

impl<'a> tracing_subscriber::fmt::writer::MakeWriter<'a> for ConsoleToggleWriter {
    type Writer = ConditionalConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConditionalConsoleWriter { enabled: Arc::clone(&self.enabled), stderr: io::stderr() }
    }
}

impl Write for ConditionalConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.enabled.load(Ordering::Relaxed) {
            self.stderr.write(buf)
        } else {
            Ok(buf.len())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.enabled.load(Ordering::Relaxed) {
            self.stderr.flush()
        } else {
            Ok(())
        }
    }
}
