pub mod abr;
pub mod diagnose;
pub mod fetch;
pub mod playback;
