use crate::node::Node;
use crate::tree::TreeError;
use std::ops::ControlFlow;
use tracing::debug;

/// Receives progress signals while a tree is walked.
///
/// `on_new_node` fires exactly once per node a tree calculates (size 0 for
/// directories). For files it is followed by `on_bytes_done` calls that add up
/// to the file size. Returning `ControlFlow::Break` from `on_bytes_done`
/// cancels the walk.
pub trait ProgressSink {
    fn on_new_node(&mut self, path: &str, size: u64);
    fn on_bytes_done(&mut self, bytes: u64) -> ControlFlow<()>;
}

/// The sink registered with a tree, if any.
#[derive(Default)]
pub struct Signals {
    sink: Option<Box<dyn ProgressSink>>,
}

impl Signals {
    pub fn register(&mut self, sink: Box<dyn ProgressSink>) {
        self.sink = Some(sink);
    }

    pub fn unregister(&mut self) -> Option<Box<dyn ProgressSink>> {
        self.sink.take()
    }

    pub fn new_node(&mut self, path: &str, size: u64) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_new_node(path, size);
        }
    }

    pub fn bytes_done(&mut self, bytes: u64) -> ControlFlow<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.on_bytes_done(bytes),
            None => ControlFlow::Continue(()),
        }
    }

    /// Fires the signals for a node whose data is already known, so walks
    /// over stored trees report like walks that hash.
    pub fn replay(&mut self, path: &str, node: &Node) -> Result<(), TreeError> {
        let size = node.size();
        self.new_node(path, size);
        if size > 0 && self.bytes_done(size).is_break() {
            debug!("Walk cancelled at {}", path);
            return Err(TreeError::Cancelled);
        }
        Ok(())
    }
}

/// Logs progress through a walk whose byte total is known up front.
pub struct ProgressLog {
    total_bytes: u64,
    nodes_seen: u64,
    bytes_done: u64,
}

impl ProgressLog {
    pub fn new(total_bytes: u64) -> Self {
        ProgressLog {
            total_bytes,
            nodes_seen: 0,
            bytes_done: 0,
        }
    }
}

impl ProgressSink for ProgressLog {
    fn on_new_node(&mut self, path: &str, _size: u64) {
        self.nodes_seen += 1;
        debug!(
            "[{} nodes, {}/{} bytes] {}",
            self.nodes_seen, self.bytes_done, self.total_bytes, path
        );
    }

    fn on_bytes_done(&mut self, bytes: u64) -> ControlFlow<()> {
        self.bytes_done += bytes;
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Signal {
        NewNode(String, u64),
        BytesDone(u64),
    }

    /// Records every signal; cancels once `cancel_after_bytes` have been seen.
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub signals: Rc<RefCell<Vec<Signal>>>,
        pub cancel_after_bytes: Option<u64>,
        bytes: Rc<RefCell<u64>>,
    }

    impl Recorder {
        pub fn cancelling_after(bytes: u64) -> Self {
            Recorder {
                cancel_after_bytes: Some(bytes),
                ..Recorder::default()
            }
        }

        pub fn new_node_paths(&self) -> Vec<String> {
            self.signals
                .borrow()
                .iter()
                .filter_map(|s| match s {
                    Signal::NewNode(path, _) => Some(path.clone()),
                    Signal::BytesDone(_) => None,
                })
                .collect()
        }

        pub fn total_bytes(&self) -> u64 {
            self.signals
                .borrow()
                .iter()
                .map(|s| match s {
                    Signal::BytesDone(n) => *n,
                    Signal::NewNode(..) => 0,
                })
                .sum()
        }
    }

    impl ProgressSink for Recorder {
        fn on_new_node(&mut self, path: &str, size: u64) {
            self.signals
                .borrow_mut()
                .push(Signal::NewNode(path.to_string(), size));
        }

        fn on_bytes_done(&mut self, bytes: u64) -> ControlFlow<()> {
            self.signals.borrow_mut().push(Signal::BytesDone(bytes));
            *self.bytes.borrow_mut() += bytes;
            match self.cancel_after_bytes {
                Some(limit) if *self.bytes.borrow() >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }
}
