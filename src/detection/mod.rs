// Detection option tree - deduplicated rule option trees and their evaluation
pub mod budget;
pub mod engine;
pub mod hash;
pub mod option;
pub mod option_store;
pub mod options;
pub mod tree;

pub use budget::{Budget, NoBudget, PacketBudget};
pub use engine::{EngineConfig, EvalContext, EvaluationEngine, NodeStats, WorkerState};
pub use option::{EvalStatus, OptionData, OptionKind, OptionScratch};
pub use option_store::{OptionId, OptionKeyStore, OPTION_STORE_CAPACITY};
pub use options::FlowBitStore;
pub use tree::{
    ChainLink, NodeId, NodeSpec, NodeTarget, SubtreeStore, TreeBuilder, TreeNode,
    SUBTREE_STORE_CAPACITY,
};
