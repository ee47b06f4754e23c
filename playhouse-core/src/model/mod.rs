pub mod guild;
pub mod media_asset;
pub mod overlay_client;
pub mod playback_job;
pub mod rich_text;

pub use guild::Guild;
pub use media_asset::{MediaAsset, MediaKind, MediaStatus};
pub use overlay_client::{MemeBoardItem, OverlayClient};
pub use playback_job::{
    CreateJobArgs, JobStatus, PlaybackJob, PromoteData, ReleaseTarget, SuspendData, Terminal,
};
pub use rich_text::RichPayload;
