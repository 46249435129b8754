//! YouTube Data API clients: caption upload and channel video listing.

pub mod channel;
pub mod client;
pub mod error;

pub use channel::{ChannelClient, ChannelVideo};
pub use client::{CaptionClient, CaptionUpload, YoutubeConfig};
pub use error::{YoutubeError, YoutubeResult};
