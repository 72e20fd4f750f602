use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Deadline plus manual cancellation, checked between statements by the
/// parser and the interpreter.
///
/// Child tokens observe their parent: cancelling a root token trips every
/// token derived from it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
            parent: None,
        }
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.parent
            .as_ref()
            .map_or(false, |parent| parent.is_cancelled())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn child_observes_parent_cancellation() {
        let root = CancellationToken::new();
        let child = root.child();
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn elapsed_deadline_trips_the_token() {
        let token = CancellationToken::with_deadline(Duration::ZERO);
        assert!(token.is_cancelled());
    }
}
