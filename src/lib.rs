//! lull - an incremental, priority-ordered render scheduler that keeps
//! working while parts of the tree wait on data.
//!
//! Render steps either produce output, suspend on a [`Token`], or fail.
//! Suspended subtrees are left as holes, or captured by the nearest suspense
//! boundary, which decides between waiting and showing its fallback. Settling
//! a token re-queues exactly the tasks waiting on it.
//!
//! ```ignore
//! let mut sched = Scheduler::new(SchedulerConfig::default());
//! let cache = sched.resources();
//! let root = sched.tree_mut().group(Position::Root, "page")?;
//! sched.tree_mut().element(root, "profile", move |ctx| cache.read(ctx, "user"))?;
//! sched.on_commit(|commit| println!("{commit}"));
//!
//! sched.schedule(root, Priority::Normal)?;
//! sched.flush_all()?;
//! ```

#[macro_use]
pub mod logger;

pub mod boundary;
pub mod cli;
pub mod clock;
pub mod commit;
pub mod config;
pub mod core;
pub mod executor;
pub mod queue;
pub mod registry;
pub mod scenario;
pub mod scheduler;
pub mod tree;

pub use boundary::{Boundary, BoundaryMode, BoundaryProps};
pub use clock::Time;
pub use commit::Commit;
pub use config::{ConfigError, SchedulerConfig};
pub use crate::core::{
    BoundaryId, NodeId, Priority, RenderError, SchedulerError, TaskHandle, TaskId, Token,
};
pub use executor::OutputNode;
pub use registry::{Outcome, ResourceCache, Settler};
pub use scenario::{Scenario, ScenarioError};
pub use scheduler::{FlushReport, Scheduler, TaskInfo, TaskStatus};
pub use tree::{DisplayMode, Position, RenderContext, RenderOutcome, Tree};
