//! Pod relocation
//!
//! Moves pods to another scheduler or node using one of these paths:
//! - In-place update of the pod object
//! - Delete and recreate from a projection of the pod
//! - Controller template update, letting the controller recreate the pod
//! - Kill one controller replica and recreate it bound to a chosen node

pub mod convergence;
mod engine;
pub mod placement;
pub mod projector;
pub mod selector;
mod types;

pub use convergence::{check, classify, Convergence, Waiter};
pub use engine::{with_template_scheduler, write_snapshot, Relocator};
pub use placement::{schedulable_names, Placement};
pub use projector::{pin_to_node, project, with_scheduler};
pub use selector::{controller_selector, label_selector};
pub use types::*;
