//! Read-only chain and channel registry access
//!
//! Provides:
//! - The chain name <-> chain id mapping (`chain_chainid.json`)
//! - Per-source channel documents (`<chain_id>-channels.json`)
//! - Discovery of channel documents under a home directory

mod chains;
mod channels;

pub use chains::ChainRegistry;
pub use channels::{channel_file_path, discover_channel_files, load_channels, ChannelRecord};
