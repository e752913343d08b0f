//! Query engine for coursedb.
//!
//! A query runs through five stages: the compiler validates a
//! [`QuerySpec`](coursedb_proto::QuerySpec) against the registry, the
//! resolver plans joins, the renderer produces parameterized SQL per concrete
//! root, the executor runs it with retry, and the assembler folds rows back
//! into entity graphs.

mod assemble;
mod compiler;
mod executor;
mod render;
mod resolver;

pub use assemble::{order_and_limit, Assembled, EntityNode, Related, RowAssembler};
pub use compiler::{
    CompiledQuery, Comparison, Predicate, QueryCompiler, ResolvedPath, SortKey, Terminal,
};
pub use executor::StatementExecutor;
pub use render::{
    FetchLayout, NodeLayout, RefSlot, RenderedQuery, RowLayout, SqlRenderer, SqlWriter,
    ROOT_ALIAS, SUBTYPE_COLUMN,
};
pub use resolver::{Branch, JoinPlan, JoinPurpose, JoinResolver, JoinStep};
