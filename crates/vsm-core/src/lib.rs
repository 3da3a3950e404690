pub mod error;
pub mod eval;
pub mod monitor;
pub mod ruleset;
pub mod signum;
pub mod state;
pub mod tree;
pub mod value;

pub use error::{CoreError, CoreReason, CoreResult};
pub use eval::eval_expr;
pub use monitor::MonitorEffect;
pub use ruleset::{CompiledRule, InlineEmit, ParseOptions, RuleId, RuleSet, parse_ruleset};
pub use signum::SignalMap;
pub use state::StateStore;
pub use tree::{ConditionNode, EmitSpec, MonitorWindow, NodeId, NodeKind, RuleTree};
pub use value::Value;
