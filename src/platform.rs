use anyhow::Result;
use crossbeam_channel::Sender;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, warn};

#[cfg(unix)]
use signal_hook::{consts::SIGINT, consts::SIGPIPE, consts::SIGTERM, consts::SIGUSR1, iterator::Signals};

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }
}

/// Set once any termination signal arrives
pub static SHOULD_TERMINATE: AtomicBool = AtomicBool::new(false);
pub static TERMINATED_BY_SIGNAL: AtomicBool = AtomicBool::new(false);
static TERMINATED_BY_SIGTERM: AtomicBool = AtomicBool::new(false);

/// Control messages sent by the signal handler to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    Shutdown { immediate: bool },
    PrintStats,
}

/// Translates process signals into [`Ctrl`] messages on a background thread.
///
/// The first SIGINT/SIGTERM requests a graceful shutdown; a second one exits
/// right away.
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    pub fn new(ctrl_sender: Sender<Ctrl>) -> Result<Self> {
        #[cfg(unix)]
        {
            let mut signals = Signals::new([SIGINT, SIGPIPE, SIGTERM, SIGUSR1])?;

            let handle = thread::Builder::new()
                .name("chunkmill-signals".to_string())
                .spawn(move || {
                    let mut shutdown_count = 0;
                    for sig in signals.forever() {
                        match sig {
                            SIGINT | SIGTERM => {
                                SHOULD_TERMINATE.store(true, Ordering::Relaxed);
                                TERMINATED_BY_SIGNAL.store(true, Ordering::Relaxed);
                                if sig == SIGTERM {
                                    TERMINATED_BY_SIGTERM.store(true, Ordering::Relaxed);
                                }
                                shutdown_count += 1;
                                let immediate = shutdown_count > 1;
                                warn!(
                                    signal = if sig == SIGINT { "SIGINT" } else { "SIGTERM" },
                                    immediate, "shutdown requested"
                                );
                                let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                                if immediate {
                                    signal_exit_code().exit();
                                }
                            }
                            SIGPIPE => {
                                // Reader went away; nothing left to report to
                                SHOULD_TERMINATE.store(true, Ordering::Relaxed);
                                TERMINATED_BY_SIGNAL.store(true, Ordering::Relaxed);
                                ExitCode::SignalPipe.exit();
                            }
                            SIGUSR1 => {
                                let _ = ctrl_sender.send(Ctrl::PrintStats);
                            }
                            other => debug!(signal = other, "ignoring unexpected signal"),
                        }
                    }
                })?;

            Ok(SignalHandler { _handle: handle })
        }

        #[cfg(windows)]
        {
            let term_flag = std::sync::Arc::new(AtomicBool::new(false));
            flag::register(SIGINT, std::sync::Arc::clone(&term_flag))?;

            let handle = thread::Builder::new()
                .name("chunkmill-signals".to_string())
                .spawn(move || {
                    let mut shutdown_count = 0;
                    loop {
                        thread::sleep(std::time::Duration::from_millis(100));
                        if term_flag.swap(false, Ordering::Relaxed) {
                            SHOULD_TERMINATE.store(true, Ordering::Relaxed);
                            TERMINATED_BY_SIGNAL.store(true, Ordering::Relaxed);
                            shutdown_count += 1;
                            let immediate = shutdown_count > 1;
                            let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                            if immediate {
                                ExitCode::SignalInt.exit();
                            }
                        }
                    }
                })?;

            Ok(SignalHandler { _handle: handle })
        }
    }

    pub fn should_terminate() -> bool {
        SHOULD_TERMINATE.load(Ordering::Relaxed)
    }
}

/// Exit code matching the signal that stopped the run
pub fn signal_exit_code() -> ExitCode {
    if TERMINATED_BY_SIGTERM.load(Ordering::Relaxed) {
        ExitCode::SignalTerm
    } else {
        ExitCode::SignalInt
    }
}

/// Stdout writer that exits quietly on a broken pipe
pub struct SafeStdout {
    stdout: io::Stdout,
}

impl Default for SafeStdout {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeStdout {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }

    pub fn writeln(&mut self, data: &str) -> Result<()> {
        match writeln!(self.stdout, "{}", data) {
            Ok(()) => Ok(()),
            Err(e) if is_broken_pipe(&e) => ExitCode::SignalPipe.exit(),
            Err(e) => Err(anyhow::anyhow!("Failed to write to stdout: {}", e)),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.stdout.flush() {
            Ok(()) => Ok(()),
            Err(e) if is_broken_pipe(&e) => ExitCode::SignalPipe.exit(),
            Err(e) => Err(anyhow::anyhow!("Failed to flush stdout: {}", e)),
        }
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
    }
    #[cfg(windows)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
            || e.raw_os_error() == Some(232) // ERROR_NO_DATA
            || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE
    }
}
