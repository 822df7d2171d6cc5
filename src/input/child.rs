use std::process::Child;
use tokio::runtime::Handle;
use tracing::debug;

/// Handle for a decoder process which ensures that it is killed and reaped,
/// whether on [`kill`] or on drop.
///
/// [`kill`]: ChildContainer::kill
#[derive(Debug)]
pub struct ChildContainer(Option<Child>);

impl From<Child> for ChildContainer {
    fn from(child: Child) -> Self {
        Self(Some(child))
    }
}

impl ChildContainer {
    /// Kills the process if it is still owned. Repeated calls do nothing.
    pub fn kill(&mut self) {
        let Some(child) = self.0.take() else {
            return;
        };

        if let Ok(handle) = Handle::try_current() {
            handle.spawn_blocking(move || cleanup_child_process(child));
        } else {
            cleanup_child_process(child);
        }
    }

    /// Returns whether the process is still owned by this container.
    pub fn is_alive(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for ChildContainer {
    fn drop(&mut self) {
        self.kill();
    }
}

fn cleanup_child_process(mut child: Child) {
    // The process may have exited already, in which case kill fails harmlessly.
    drop(child.kill());

    if let Err(e) = child.wait() {
        debug!("Error awaiting child process: {:?}", e);
    }
}
