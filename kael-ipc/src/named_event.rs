use std::time::Duration;

use crate::error::{IpcError, Result};

/// An auto-reset, named, OS-level event used both as a synchronization
/// primitive and as backpressure: the signaling side blocks on the
/// acknowledging side's own event, so neither side can race ahead of the
/// other. Unsignaled at creation.
pub struct NamedEvent {
    name: String,
    backing: Backing,
}

enum Backing {
    #[cfg(windows)]
    Windows(windows::Win32::Foundation::HANDLE),
    #[cfg(not(windows))]
    Portable(std::sync::Arc<portable::Slot>),
}

impl NamedEvent {
    /// Creates a brand-new named event, owned by this process. Fails if an
    /// event with this name already exists and could not be created fresh.
    pub fn create(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        #[cfg(windows)]
        {
            use windows::core::HSTRING;
            use windows::Win32::System::Threading::CreateEventW;
            let handle = unsafe { CreateEventW(None, false, false, &HSTRING::from(&name)) }
                .map_err(|_| IpcError::CreateFailed(name.clone()))?;
            Ok(NamedEvent { name, backing: Backing::Windows(handle) })
        }
        #[cfg(not(windows))]
        {
            let slot = portable::registry().create(&name);
            Ok(NamedEvent { name, backing: Backing::Portable(slot) })
        }
    }

    /// Opens an event created by another process, retrying at a fixed
    /// interval until it appears or the retry budget is exhausted.
    pub fn open_with_retry(
        name: impl Into<String>,
        retry_interval: Duration,
        max_attempts: u32,
    ) -> Result<Self> {
        let name = name.into();
        for attempt in 0..max_attempts {
            if let Some(event) = Self::try_open(&name) {
                return Ok(event);
            }
            if attempt + 1 < max_attempts {
                std::thread::sleep(retry_interval);
            }
        }
        Err(IpcError::OpenTimedOut(name))
    }

    /// Blocks until the event appears, with no upper bound on attempts.
    /// Mirrors the target-side agent's non-allocating open-retry loop,
    /// which never gives up: the monitor is assumed to create the event
    /// before the hook ever fires.
    pub fn wait_until_opened(name: impl Into<String>, retry_interval: Duration) -> Self {
        let name = name.into();
        loop {
            if let Some(event) = Self::try_open(&name) {
                return event;
            }
            std::thread::sleep(retry_interval);
        }
    }

    fn try_open(name: &str) -> Option<Self> {
        #[cfg(windows)]
        {
            use windows::core::HSTRING;
            use windows::Win32::System::Threading::{
                OpenEventW, EVENT_MODIFY_STATE, SYNCHRONIZE,
            };
            let handle = unsafe {
                OpenEventW(SYNCHRONIZE | EVENT_MODIFY_STATE, false, &HSTRING::from(name))
            }
            .ok()?;
            Some(NamedEvent { name: name.to_string(), backing: Backing::Windows(handle) })
        }
        #[cfg(not(windows))]
        {
            let slot = portable::registry().try_open(name)?;
            Some(NamedEvent { name: name.to_string(), backing: Backing::Portable(slot) })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal(&self) {
        match &self.backing {
            #[cfg(windows)]
            Backing::Windows(handle) => {
                let _ = unsafe { windows::Win32::System::Threading::SetEvent(*handle) };
            }
            #[cfg(not(windows))]
            Backing::Portable(slot) => slot.signal(),
        }
    }

    /// Blocks indefinitely until signaled, consuming the signal (auto-reset).
    pub fn wait(&self) -> Result<()> {
        self.wait_timeout(None).map(|signaled| {
            debug_assert!(signaled);
        })
    }

    /// Waits up to `timeout` for the event, returning whether it fired.
    /// `None` waits indefinitely.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> Result<bool> {
        match &self.backing {
            #[cfg(windows)]
            Backing::Windows(handle) => {
                use windows::Win32::Foundation::WAIT_OBJECT_0;
                use windows::Win32::System::Threading::WaitForSingleObject;
                let millis = timeout.map(|d| d.as_millis() as u32).unwrap_or(u32::MAX);
                let result = unsafe { WaitForSingleObject(*handle, millis) };
                if result == WAIT_OBJECT_0 {
                    Ok(true)
                } else if timeout.is_some() {
                    Ok(false)
                } else {
                    Err(IpcError::WaitFailed(self.name.clone()))
                }
            }
            #[cfg(not(windows))]
            Backing::Portable(slot) => Ok(slot.wait_timeout(timeout)),
        }
    }
}

#[cfg(windows)]
impl Drop for NamedEvent {
    fn drop(&mut self) {
        if let Backing::Windows(handle) = self.backing {
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(handle);
            }
        }
    }
}

#[cfg(not(windows))]
mod portable {
    use std::collections::HashMap;
    use std::sync::{Arc, Condvar, Mutex, OnceLock};
    use std::time::Duration;

    /// Process-local stand-in for a named OS event, used so this crate's
    /// tests and non-Windows builds exercise the same create/open/signal/
    /// wait protocol without a real kernel object.
    pub struct Slot {
        state: Mutex<bool>,
        condvar: Condvar,
    }

    impl Slot {
        fn new() -> Self {
            Slot { state: Mutex::new(false), condvar: Condvar::new() }
        }

        pub fn signal(&self) {
            let mut signaled = self.state.lock().unwrap();
            *signaled = true;
            self.condvar.notify_all();
        }

        pub fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
            let mut signaled = self.state.lock().unwrap();
            match timeout {
                None => {
                    while !*signaled {
                        signaled = self.condvar.wait(signaled).unwrap();
                    }
                    *signaled = false;
                    true
                }
                Some(duration) => {
                    let (guard, result) =
                        self.condvar.wait_timeout_while(signaled, duration, |s| !*s).unwrap();
                    signaled = guard;
                    if *signaled && !result.timed_out() {
                        *signaled = false;
                        true
                    } else {
                        false
                    }
                }
            }
        }
    }

    #[derive(Default)]
    pub struct Registry {
        slots: Mutex<HashMap<String, Arc<Slot>>>,
    }

    impl Registry {
        pub fn create(&self, name: &str) -> Arc<Slot> {
            let mut slots = self.slots.lock().unwrap();
            slots.entry(name.to_string()).or_insert_with(|| Arc::new(Slot::new())).clone()
        }

        pub fn try_open(&self, name: &str) -> Option<Arc<Slot>> {
            self.slots.lock().unwrap().get(name).cloned()
        }
    }

    pub fn registry() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::default)
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait_round_trips() {
        let name = "kael-ipc-test.signal-then-wait";
        let writer = NamedEvent::create(name).unwrap();
        let reader = NamedEvent::try_open(name).unwrap();
        writer.signal();
        assert!(reader.wait_timeout(Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn wait_timeout_elapses_without_signal() {
        let name = "kael-ipc-test.wait-timeout-elapses";
        let reader = NamedEvent::create(name).unwrap();
        assert!(!reader.wait_timeout(Some(Duration::from_millis(20))).unwrap());
    }

    #[test]
    fn open_before_create_fails_without_retry() {
        let name = "kael-ipc-test.open-before-create";
        assert!(NamedEvent::try_open(name).is_none());
    }

    #[test]
    fn open_with_retry_succeeds_once_created() {
        let name = "kael-ipc-test.open-with-retry";
        let _writer = NamedEvent::create(name).unwrap();
        let reader =
            NamedEvent::open_with_retry(name, Duration::from_millis(5), 20).unwrap();
        assert_eq!(reader.name(), name);
    }
}
