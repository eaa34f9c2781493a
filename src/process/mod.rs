mod command;
mod fifo;
mod handle;
mod supervisor;

pub use command::{resolve_binary, split_args, stream_id, EncoderCommand};
pub use fifo::ProgressChannel;
pub use handle::{ProcessHandle, ProcessStatus};
pub use supervisor::{run_passthrough, ProcessSupervisor};
