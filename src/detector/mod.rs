/// Merged node condition set and its shared accessor
pub mod node_state;
/// Fan-in aggregator driving monitors and exporters
pub mod problem_detector;

pub use node_state::{NodeState, NodeStatusHandle};
pub use problem_detector::{ProblemDetector, ShutdownHandle};
