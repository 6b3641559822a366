use std::thread;

/// A panic propagation guard for background loops.
///
/// A `Pill` is moved into each spawned worker and collector loop. If the
/// loop panics, the `Pill` is dropped during unwinding and panics again,
/// which escalates the failure instead of leaving a silently dead loop
/// behind. A dead collector would otherwise stop all result delivery for
/// its streamer while callers block until timeout.
pub struct Pill {}

impl Pill {
    pub fn new() -> Self {
        Self {}
    }
}

impl Drop for Pill {
    fn drop(&mut self) {
        if thread::panicking() {
            panic!("background loop panicked - propagating to owner");
        }
    }
}
