//! Scripted command runner shared by the unit tests

use crate::platform::{CommandRunner, PlatformError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Handler = dyn Fn(&str, &[String]) -> Result<String, PlatformError> + Send + Sync;

pub(crate) struct FakeRunner {
    installed: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    handler: Box<Handler>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRunner {
    /// `handler` receives the program name and arguments of every call.
    pub(crate) fn new(
        handler: impl Fn(&str, &[String]) -> Result<String, PlatformError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            installed: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_installed(self, programs: &[&str]) -> Self {
        self.installed
            .lock()
            .unwrap()
            .extend(programs.iter().map(|p| p.to_string()));
        self
    }

    /// Make every command take `delay` (in tokio time).
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every command line run so far, in order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CommandRunner for FakeRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .lock()
            .unwrap()
            .contains(program)
            .then(|| PathBuf::from(program))
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<String, PlatformError> {
        let program = program.to_string_lossy().to_string();
        let mut line = program.clone();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push(line);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.handler)(&program, args)
    }
}

pub(crate) fn command_failed(message: &str) -> PlatformError {
    PlatformError::CommandFailed {
        command: "fake".to_string(),
        message: message.to_string(),
    }
}
