//! Streaming installation of archive entries to disk.
//!
//! - [`pipeline`]: moves one source into one file in bounded chunks, with
//!   optional decompression, per-chunk progress and a final CRC check
//! - [`worker`]: runs the pipeline on its own task and talks to callers
//!   through [`WorkerRequest`]/[`WorkerResponse`] messages
//! - [`installer`]: installs a whole game ZIP through the worker, retrying
//!   files that fail transiently

mod installer;
mod messages;
mod pipeline;
mod worker;

pub use installer::{
    GameIni, InstallProgress, InstallSummary, Installer, destination_path, entry_compression, find_game_ini,
    is_game_ini, parse_game_name,
};
pub use messages::{Compression, WorkerRequest, WorkerResponse, WriteRequest};
pub use pipeline::{ProgressSink, Stage, write_file, write_file_to};
pub use worker::InstallWorker;
