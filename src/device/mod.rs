mod stream;
mod workspace;

pub use stream::Stream;
pub use workspace::{WorkspaceLease, WorkspacePool, free_workspace};
